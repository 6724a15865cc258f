use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use yasna::models::ObjectIdentifier;
use yasna::{DERWriter, Tag};

use crate::key_pair::encode_pem;
use crate::oid::{OID_PKCS_9_AT_EXTENSION_REQUEST, OID_RSA_ENCRYPTION};
use crate::{
	write_san_extension, write_signature_algorithm, write_subject_public_key_info, Error, KeyPair,
	SanType, Subject,
};

const PEM_TAG_CSR: &str = "CERTIFICATE REQUEST";

/// Parameters for a certificate signing request
///
/// The requested name doubles as the subject common name and, unless it is
/// an IP literal, as the first DNS subject alt name.
pub struct CsrParams {
	/// Subject of the request; the common name is always the requested name
	pub subject: Subject,
	/// Requested subject alt names, in request order
	pub subject_alt_names: Vec<SanType>,
}

impl CsrParams {
	/// Builds request parameters for `name` plus any additional alt names.
	///
	/// Every token is classified with [`SanType::classify`]; an IP literal
	/// lands in the IP alt names while anything else becomes a DNS name.
	/// The optional attributes of `template` are carried into the subject,
	/// its common name is replaced by `name`.
	pub fn new(name: &str, extra_sans: &[String], template: Subject) -> Result<Self, Error> {
		if name.is_empty() {
			return Err(Error::InvalidName(name.to_owned()));
		}
		let mut subject_alt_names = vec![SanType::classify(name)];
		for token in extra_sans {
			if token.is_empty() {
				continue;
			}
			subject_alt_names.push(SanType::classify(token));
		}
		let subject = Subject {
			common_name: name.to_owned(),
			..template
		};
		Ok(CsrParams {
			subject,
			subject_alt_names,
		})
	}

	/// Serializes the request in binary DER format, self-signed with `key`
	pub fn serialize_der(&self, key: &KeyPair) -> Result<Vec<u8>, Error> {
		let public_key = key.public_key_der()?;
		yasna::try_construct_der(|writer| {
			writer.write_sequence(|writer| {
				let info = yasna::try_construct_der(|writer| {
					self.write_info(writer, &public_key);
					Ok::<(), Error>(())
				})?;
				writer.next().write_der(&info);
				write_signature_algorithm(writer.next());
				key.sign(&info, writer.next())?;
				Ok(())
			})
		})
	}

	/// Serializes the request to the ASCII PEM format, self-signed with `key`
	pub fn serialize_pem(&self, key: &KeyPair) -> Result<String, Error> {
		Ok(encode_pem(PEM_TAG_CSR, self.serialize_der(key)?))
	}

	fn write_info(&self, writer: DERWriter, public_key_der: &[u8]) {
		writer.write_sequence(|writer| {
			// Write version
			writer.next().write_u8(0);
			// Write subject
			self.subject.write_der(writer.next());
			// Write subjectPublicKeyInfo
			write_subject_public_key_info(writer.next(), public_key_der);
			// Write attributes; RFC 2986 requires the attribute tag even
			// when no attributes are present
			writer.next().write_tagged(Tag::context(0), |writer| {
				if !self.subject_alt_names.is_empty() {
					writer.write_sequence(|writer| {
						let oid = ObjectIdentifier::from_slice(OID_PKCS_9_AT_EXTENSION_REQUEST);
						writer.next().write_oid(&oid);
						writer.next().write_set(|writer| {
							writer.next().write_sequence(|writer| {
								write_san_extension(writer.next(), &self.subject_alt_names);
							});
						});
					});
				}
			});
		});
	}
}

/// A parsed certificate signing request
///
/// Only the pieces issuance needs are retained: the subject, the requested
/// alt names and the requester's public key.
pub struct Csr {
	/// Subject copied verbatim into issued certificates
	pub subject: Subject,
	/// Requested subject alt names
	pub subject_alt_names: Vec<SanType>,
	/// The requester's public key as a PKCS#1 RSAPublicKey
	pub(crate) public_key_der: Vec<u8>,
}

impl Csr {
	/// Parses a certificate signing request from the ASCII PEM format
	pub fn from_pem(pem_str: &str) -> Result<Self, Error> {
		let block = pem::parse(pem_str).map_err(|_| Error::CsrFormat)?;
		if block.tag() != PEM_TAG_CSR {
			return Err(Error::CsrFormat);
		}
		Self::from_der(block.contents())
	}

	/// Parses a certificate signing request from DER-encoded bytes and
	/// verifies its self-signature
	pub fn from_der(der: &[u8]) -> Result<Self, Error> {
		use x509_parser::prelude::FromDer;
		let csr = x509_parser::certification_request::X509CertificationRequest::from_der(der)
			.map_err(|e| Error::CsrParse(e.to_string()))?
			.1;
		csr.verify_signature()
			.map_err(|_| Error::CsrParse("invalid self-signature".into()))?;

		let info = &csr.certification_request_info;
		let subject = Subject::from_x509_name(&info.subject)
			.map_err(|_| Error::CsrParse("unreadable subject".into()))?;

		let alg_oid = info
			.subject_pki
			.algorithm
			.algorithm
			.iter()
			.ok_or_else(|| Error::CsrParse("malformed public key algorithm".into()))?
			.collect::<Vec<_>>();
		if alg_oid != OID_RSA_ENCRYPTION {
			return Err(Error::CsrParse("public key is not RSA".into()));
		}
		let public_key_der = info.subject_pki.subject_public_key.data.to_vec();

		// Pull the subject alt names out of the extension request attribute;
		// other requested extensions are not honored
		let mut subject_alt_names = Vec::new();
		for attr in info.iter_attributes() {
			let x509_parser::prelude::ParsedCriAttribute::ExtensionRequest(requested) =
				attr.parsed_attribute()
			else {
				continue;
			};
			for ext in &requested.extensions {
				let x509_parser::prelude::ParsedExtension::SubjectAlternativeName(san) =
					ext.parsed_extension()
				else {
					continue;
				};
				for name in &san.general_names {
					if let Some(san) = san_from_general(name)? {
						subject_alt_names.push(san);
					}
				}
			}
		}

		Ok(Csr {
			subject,
			subject_alt_names,
			public_key_der,
		})
	}

	/// The requester's public key as a PKCS#1 RSAPublicKey in DER
	pub fn public_key_der(&self) -> &[u8] {
		&self.public_key_der
	}
}

pub(crate) fn san_from_general(
	name: &x509_parser::extensions::GeneralName<'_>,
) -> Result<Option<SanType>, Error> {
	use x509_parser::extensions::GeneralName;
	Ok(match name {
		GeneralName::DNSName(name) => Some(SanType::DnsName((*name).into())),
		GeneralName::RFC822Name(name) => Some(SanType::Rfc822Name((*name).into())),
		GeneralName::IPAddress(octets) => Some(SanType::IpAddress(ip_addr_from_octets(octets)?)),
		_ => None,
	})
}

fn ip_addr_from_octets(octets: &[u8]) -> Result<IpAddr, Error> {
	if let Ok(ipv6_octets) = <&[u8; 16]>::try_from(octets) {
		Ok(Ipv6Addr::from(*ipv6_octets).into())
	} else if let Ok(ipv4_octets) = <&[u8; 4]>::try_from(octets) {
		Ok(Ipv4Addr::from(*ipv4_octets).into())
	} else {
		Err(Error::CsrParse(format!(
			"invalid IP address length {}",
			octets.len()
		)))
	}
}
