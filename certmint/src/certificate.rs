use std::net::IpAddr;

use rsa::pkcs1::DecodeRsaPublicKey;
use time::OffsetDateTime;
use x509_parser::prelude::{FromDer, ParsedExtension, X509Certificate};
use yasna::{DERWriter, Tag};

use crate::csr::san_from_general;
use crate::key_pair::encode_pem;
use crate::oid::{
	OID_AUTHORITY_KEY_IDENTIFIER, OID_BASIC_CONSTRAINTS, OID_KEY_USAGE,
	OID_SUBJECT_KEY_IDENTIFIER,
};
use crate::{
	key_identifier, validity_window, write_dt_utc_or_generalized, write_san_extension,
	write_signature_algorithm, write_subject_public_key_info, write_x509_extension, CaPaths, Csr,
	CsrParams, Error, KeyPair, SanType, SerialNumber, Subject,
};

const PEM_TAG_CERT: &str = "CERTIFICATE";

/// Purposes a certificate's key may be used for
///
/// The bit positions follow the KeyUsage definition in
/// [RFC 5280 section 4.2.1.3](https://tools.ietf.org/html/rfc5280#section-4.2.1.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
	/// digitalSignature
	DigitalSignature,
	/// keyEncipherment
	KeyEncipherment,
	/// keyCertSign
	KeyCertSign,
	/// cRLSign
	CrlSign,
}

impl KeyUsage {
	fn bit(self) -> u16 {
		match self {
			KeyUsage::DigitalSignature => 0,
			KeyUsage::KeyEncipherment => 2,
			KeyUsage::KeyCertSign => 5,
			KeyUsage::CrlSign => 6,
		}
	}
}

/// Parameters used for certificate generation
pub struct CertificateParams {
	/// Subject of the certificate
	pub subject: Subject,
	/// Subject alt names, copied verbatim from the request for leaves
	pub subject_alt_names: Vec<SanType>,
	/// The certificate's serial number
	pub serial_number: SerialNumber,
	/// Start of the validity window
	pub not_before: OffsetDateTime,
	/// End of the validity window, one second before the day boundary
	pub not_after: OffsetDateTime,
	/// Key usage bits
	pub key_usages: Vec<KeyUsage>,
	/// Whether this certificate may sign other certificates
	pub is_ca: bool,
}

impl CertificateParams {
	/// Parameters for a self-signed root CA certificate, valid from now
	pub fn root(subject: Subject, lifetime_days: u32) -> Result<Self, Error> {
		Self::root_at(subject, lifetime_days, OffsetDateTime::now_utc())
	}

	/// Parameters for a self-signed root CA certificate with an explicit
	/// validity start
	pub fn root_at(
		subject: Subject,
		lifetime_days: u32,
		not_before: OffsetDateTime,
	) -> Result<Self, Error> {
		let (not_before, not_after) = validity_window(not_before, lifetime_days);
		Ok(CertificateParams {
			subject,
			subject_alt_names: Vec::new(),
			serial_number: SerialNumber::generate()?,
			not_before,
			not_after,
			key_usages: vec![
				KeyUsage::KeyCertSign,
				KeyUsage::KeyEncipherment,
				KeyUsage::DigitalSignature,
				KeyUsage::CrlSign,
			],
			is_ca: true,
		})
	}

	/// Parameters for a leaf certificate satisfying `csr`, valid from now
	pub fn leaf(csr: &Csr, lifetime_days: u32) -> Result<Self, Error> {
		Self::leaf_at(csr, lifetime_days, OffsetDateTime::now_utc())
	}

	/// Parameters for a leaf certificate satisfying `csr` with an explicit
	/// validity start
	///
	/// Subject and alt names are copied verbatim from the request; the
	/// usable purposes are pinned to TLS-style key usage without any
	/// certificate signing capability.
	pub fn leaf_at(
		csr: &Csr,
		lifetime_days: u32,
		not_before: OffsetDateTime,
	) -> Result<Self, Error> {
		let (not_before, not_after) = validity_window(not_before, lifetime_days);
		Ok(CertificateParams {
			subject: csr.subject.clone(),
			subject_alt_names: csr.subject_alt_names.clone(),
			serial_number: SerialNumber::generate()?,
			not_before,
			not_after,
			key_usages: vec![KeyUsage::KeyEncipherment, KeyUsage::DigitalSignature],
			is_ca: false,
		})
	}

	/// Serializes a self-signed certificate in binary DER format
	pub fn self_sign_der(&self, key: &KeyPair) -> Result<Vec<u8>, Error> {
		let public_key = key.public_key_der()?;
		self.serialize_der_inner(&public_key, None, key)
	}

	/// Serializes a self-signed certificate to the ASCII PEM format
	pub fn self_sign_pem(&self, key: &KeyPair) -> Result<String, Error> {
		Ok(encode_pem(PEM_TAG_CERT, self.self_sign_der(key)?))
	}

	/// Serializes the certificate in binary DER format, carrying the
	/// requester's public key and signed by `issuer`
	pub fn sign_der(&self, csr: &Csr, issuer: &Issuer<'_>) -> Result<Vec<u8>, Error> {
		self.serialize_der_inner(csr.public_key_der(), Some(issuer), issuer.key_pair)
	}

	/// Serializes the certificate to the ASCII PEM format, signed by `issuer`
	pub fn sign_pem(&self, csr: &Csr, issuer: &Issuer<'_>) -> Result<String, Error> {
		Ok(encode_pem(PEM_TAG_CERT, self.sign_der(csr, issuer)?))
	}

	fn serialize_der_inner(
		&self,
		public_key_der: &[u8],
		issuer: Option<&Issuer<'_>>,
		signer: &KeyPair,
	) -> Result<Vec<u8>, Error> {
		yasna::try_construct_der(|writer| {
			writer.write_sequence(|writer| {
				let tbs = yasna::try_construct_der(|writer| {
					self.write_tbs(writer, public_key_der, issuer);
					Ok::<(), Error>(())
				})?;
				// Write tbsCertificate
				writer.next().write_der(&tbs);
				// Write signatureAlgorithm
				write_signature_algorithm(writer.next());
				// Write signature
				signer.sign(&tbs, writer.next())?;
				Ok(())
			})
		})
	}

	fn write_tbs(&self, writer: DERWriter, public_key_der: &[u8], issuer: Option<&Issuer<'_>>) {
		writer.write_sequence(|writer| {
			// Write version
			writer.next().write_tagged(Tag::context(0), |writer| {
				writer.write_u8(2);
			});
			// Write serialNumber
			writer
				.next()
				.write_bigint_bytes(self.serial_number.as_ref(), true);
			// Write signature
			write_signature_algorithm(writer.next());
			// Write issuer
			match issuer {
				Some(issuer) => writer.next().write_der(&issuer.subject_der),
				None => self.subject.write_der(writer.next()),
			}
			// Write validity
			writer.next().write_sequence(|writer| {
				write_dt_utc_or_generalized(writer.next(), self.not_before);
				write_dt_utc_or_generalized(writer.next(), self.not_after);
			});
			// Write subject
			self.subject.write_der(writer.next());
			// Write subjectPublicKeyInfo
			write_subject_public_key_info(writer.next(), public_key_der);
			// Write extensions
			writer.next().write_tagged(Tag::context(3), |writer| {
				writer.write_sequence(|writer| {
					if let Some(issuer) = issuer {
						write_authority_key_identifier(writer.next(), &issuer.key_identifier);
					}
					if !self.subject_alt_names.is_empty() {
						write_san_extension(writer.next(), &self.subject_alt_names);
					}
					if !self.key_usages.is_empty() {
						write_x509_extension(writer.next(), OID_KEY_USAGE, true, |writer| {
							let mut bits: u16 = 0;
							for usage in &self.key_usages {
								bits |= 1 << usage.bit();
							}
							// One content byte unless a bit past position 7 is set
							let msb = 16 - bits.leading_zeros();
							let nb = if msb <= 8 { 1 } else { 2 };
							let bits = bits.reverse_bits().to_be_bytes();
							writer.write_bitvec_bytes(&bits[..nb], msb as usize);
						});
					}
					if self.is_ca {
						write_x509_extension(
							writer.next(),
							OID_SUBJECT_KEY_IDENTIFIER,
							false,
							|writer| {
								writer.write_bytes(&key_identifier(public_key_der));
							},
						);
					}
					// BasicConstraints is always present and critical; the
					// cA flag defaults to FALSE and must be omitted for
					// leaves in DER
					write_x509_extension(writer.next(), OID_BASIC_CONSTRAINTS, true, |writer| {
						writer.write_sequence(|writer| {
							if self.is_ca {
								writer.next().write_bool(true);
							}
						});
					});
				});
			});
		});
	}
}

/// Serializes an X.509v3 authority key identifier extension referring to the
/// issuing certificate's subject key identifier
fn write_authority_key_identifier(writer: DERWriter, key_id: &[u8]) {
	write_x509_extension(writer, OID_AUTHORITY_KEY_IDENTIFIER, false, |writer| {
		writer.write_sequence(|writer| {
			writer
				.next()
				.write_tagged_implicit(Tag::context(0), |writer| writer.write_bytes(key_id));
		});
	});
}

/// Signing identity of the root CA
///
/// Couples the root certificate's subject and key identifier with the root
/// private key, verifying on construction that the two actually belong
/// together.
pub struct Issuer<'a> {
	subject_der: Vec<u8>,
	key_identifier: Vec<u8>,
	key_pair: &'a KeyPair,
}

impl<'a> Issuer<'a> {
	/// Builds a signing identity from the root certificate PEM and root key.
	///
	/// Fails with [`Error::IssuerKeyMismatch`] when the certificate's public
	/// key is not the public half of `key_pair`; a trust store in that state
	/// cannot sign anything coherent.
	pub fn new(root_cert_pem: &str, key_pair: &'a KeyPair) -> Result<Self, Error> {
		let block = pem::parse(root_cert_pem).map_err(|e| Error::CertFormat(e.to_string()))?;
		let (_, x509) = X509Certificate::from_der(block.contents())
			.map_err(|e| Error::CertFormat(e.to_string()))?;

		let spki_data = x509.public_key().subject_public_key.data.to_vec();
		if spki_data != key_pair.public_key_der()? {
			return Err(Error::IssuerKeyMismatch);
		}

		let key_identifier = x509
			.iter_extensions()
			.find_map(|ext| match ext.parsed_extension() {
				ParsedExtension::SubjectKeyIdentifier(id) => Some(id.0.to_vec()),
				_ => None,
			})
			.unwrap_or_else(|| key_identifier(&spki_data));

		Ok(Issuer {
			subject_der: x509.subject().as_raw().to_vec(),
			key_identifier,
			key_pair,
		})
	}
}

/// A freshly issued certificate, as returned by [`issue_host`]
pub struct IssuedCertificate {
	/// The allocated serial number, hex formatted
	pub serial: String,
	/// End of the certificate's validity window
	pub not_after: OffsetDateTime,
	/// The certificate itself, PEM encoded
	pub cert_pem: String,
}

/// Runs the full issuance pipeline for one host and persists the artifacts.
///
/// Generates a fresh key, builds and saves a CSR, issues a certificate
/// signed by `issuer` and writes key, request and certificate into the
/// host's directory under `paths`. Valid from now.
pub fn issue_host(
	paths: &CaPaths,
	issuer: &Issuer<'_>,
	name: &str,
	extra_sans: &[String],
	subject_template: Subject,
	bits: usize,
	lifetime_days: u32,
) -> Result<IssuedCertificate, Error> {
	issue_host_at(
		paths,
		issuer,
		name,
		extra_sans,
		subject_template,
		bits,
		lifetime_days,
		OffsetDateTime::now_utc(),
	)
}

/// [`issue_host`] with an explicit validity start
#[allow(clippy::too_many_arguments)]
pub fn issue_host_at(
	paths: &CaPaths,
	issuer: &Issuer<'_>,
	name: &str,
	extra_sans: &[String],
	subject_template: Subject,
	bits: usize,
	lifetime_days: u32,
	not_before: OffsetDateTime,
) -> Result<IssuedCertificate, Error> {
	// the name doubles as a directory name, so reject unusable ones before
	// spending time on key generation
	paths.host_cert_path(name)?;

	let key = KeyPair::generate(bits)?;
	let csr_params = CsrParams::new(name, extra_sans, subject_template)?;
	let csr_pem = csr_params.serialize_pem(&key)?;
	let csr = Csr::from_pem(&csr_pem)?;

	let params = CertificateParams::leaf_at(&csr, lifetime_days, not_before)?;
	let cert_pem = params.sign_pem(&csr, issuer)?;

	paths.save_host_key(name, &key.to_pem(None)?)?;
	paths.save_host_csr(name, &csr_pem)?;
	paths.save_host_cert(name, &cert_pem)?;

	Ok(IssuedCertificate {
		serial: params.serial_number.to_string(),
		not_after: params.not_after,
		cert_pem,
	})
}

/// A parsed, read-only view of an issued certificate
///
/// This is what the renewal engine works from: everything needed to decide
/// whether a certificate is due and to reconstruct its original request
/// parameters.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
	/// Subject as embedded in the certificate
	pub subject: Subject,
	/// DNS subject alt names
	pub dns_names: Vec<String>,
	/// IP subject alt names
	pub ip_addresses: Vec<IpAddr>,
	/// Serial number, hex formatted
	pub serial: String,
	/// Start of the validity window
	pub not_before: OffsetDateTime,
	/// End of the validity window
	pub not_after: OffsetDateTime,
	/// Modulus size of the subject's RSA key, in bits
	pub key_bits: usize,
	/// Whether the certificate is a CA
	pub is_ca: bool,
}

impl CertificateInfo {
	/// Parses a certificate from the ASCII PEM format
	pub fn from_pem(pem_str: &str) -> Result<Self, Error> {
		let block = pem::parse(pem_str).map_err(|e| Error::CertFormat(e.to_string()))?;
		let (_, x509) = X509Certificate::from_der(block.contents())
			.map_err(|e| Error::CertFormat(e.to_string()))?;

		let subject = Subject::from_x509_name(x509.subject())?;

		let mut dns_names = Vec::new();
		let mut ip_addresses = Vec::new();
		let sans = x509
			.subject_alternative_name()
			.map_err(|_| Error::CertFormat("malformed subject alt name extension".into()))?;
		if let Some(ext) = sans {
			for name in &ext.value.general_names {
				match san_from_general(name).map_err(|_| {
					Error::CertFormat("malformed subject alt name entry".into())
				})? {
					Some(SanType::DnsName(name)) => dns_names.push(name),
					Some(SanType::IpAddress(addr)) => ip_addresses.push(addr),
					_ => {},
				}
			}
		}

		let rsa_public =
			rsa::RsaPublicKey::from_pkcs1_der(x509.public_key().subject_public_key.data.as_ref())
				.map_err(|_| Error::CertFormat("subject public key is not RSA".into()))?;

		let serial = x509
			.raw_serial()
			.iter()
			.map(|b| format!("{:02x}", b))
			.collect::<Vec<_>>()
			.join(":");

		Ok(CertificateInfo {
			subject,
			dns_names,
			ip_addresses,
			serial,
			not_before: x509.validity().not_before.to_datetime(),
			not_after: x509.validity().not_after.to_datetime(),
			key_bits: rsa::traits::PublicKeyParts::size(&rsa_public) * 8,
			is_ca: x509.is_ca(),
		})
	}

	/// Whole days until the certificate expires, negative once it has
	pub fn days_until_expiry(&self, now: OffsetDateTime) -> i64 {
		(self.not_after - now).whole_days()
	}

	/// The lifetime in days the certificate was issued with, recovering the
	/// one-second template adjustment by inclusive rounding
	pub fn lifetime_days(&self) -> u32 {
		((self.not_after - self.not_before).whole_days() + 1).max(1) as u32
	}
}

#[cfg(test)]
mod tests {
	use time::macros::datetime;

	use super::*;

	fn root_fixture() -> (KeyPair, String) {
		let key = KeyPair::generate(2048).unwrap();
		let subject = Subject {
			country: Some("US".into()),
			organization: Some("Widgets Ltd".into()),
			..Subject::new("Root CA")
		};
		let params = CertificateParams::root_at(subject, 3650, datetime!(2026-01-01 00:00:00 UTC))
			.unwrap();
		let pem = params.self_sign_pem(&key).unwrap();
		(key, pem)
	}

	fn parse(pem_str: &str) -> Vec<u8> {
		pem::parse(pem_str).unwrap().contents().to_vec()
	}

	#[test]
	fn root_is_self_signed_ca() {
		let (_key, pem) = root_fixture();
		let der = parse(&pem);
		let (_, cert) = X509Certificate::from_der(&der).unwrap();

		assert!(cert.is_ca());
		// self-signed: the signature verifies against the embedded key
		assert!(cert.verify_signature(None).is_ok());
		assert_eq!(cert.issuer().as_raw(), cert.subject().as_raw());

		let usage = cert.key_usage().unwrap().unwrap().value;
		assert!(usage.key_cert_sign());
		assert!(usage.crl_sign());
		assert!(usage.digital_signature());
		assert!(usage.key_encipherment());
	}

	#[test]
	fn leaf_has_exact_validity_window_and_no_ca_powers() {
		let (root_key, root_pem) = root_fixture();
		let issuer = Issuer::new(&root_pem, &root_key).unwrap();

		let leaf_key = KeyPair::generate(2048).unwrap();
		let csr_params =
			CsrParams::new("host.example.com", &[], Subject::default()).unwrap();
		let csr_pem = csr_params.serialize_pem(&leaf_key).unwrap();
		let csr = Csr::from_pem(&csr_pem).unwrap();

		let not_before = datetime!(2026-02-01 09:30:00 UTC);
		let params = CertificateParams::leaf_at(&csr, 90, not_before).unwrap();
		let pem = params.sign_pem(&csr, &issuer).unwrap();

		let der = parse(&pem);
		let (_, cert) = X509Certificate::from_der(&der).unwrap();

		let validity = cert.validity();
		let window = validity.not_after.to_datetime() - validity.not_before.to_datetime();
		assert_eq!(
			window,
			time::Duration::days(90) - time::Duration::seconds(1)
		);

		assert!(!cert.is_ca());
		let usage = cert.key_usage().unwrap().unwrap().value;
		assert!(!usage.key_cert_sign());
		assert!(usage.digital_signature());
		assert!(usage.key_encipherment());
	}

	#[test]
	fn leaf_verifies_against_the_root() {
		let (root_key, root_pem) = root_fixture();
		let issuer = Issuer::new(&root_pem, &root_key).unwrap();

		let leaf_key = KeyPair::generate(2048).unwrap();
		let csr_params = CsrParams::new("host.example.com", &[], Subject::default()).unwrap();
		let csr = Csr::from_pem(&csr_params.serialize_pem(&leaf_key).unwrap()).unwrap();
		let params = CertificateParams::leaf(&csr, 90).unwrap();
		let pem = params.sign_pem(&csr, &issuer).unwrap();

		let leaf_der = parse(&pem);
		let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
		let root_der = parse(&root_pem);
		let (_, root) = X509Certificate::from_der(&root_der).unwrap();

		assert!(leaf.verify_signature(Some(root.public_key())).is_ok());
		assert_eq!(leaf.issuer().as_raw(), root.subject().as_raw());
	}

	#[test]
	fn leaf_copies_subject_and_alt_names_from_the_request() {
		let (root_key, root_pem) = root_fixture();
		let issuer = Issuer::new(&root_pem, &root_key).unwrap();

		let leaf_key = KeyPair::generate(2048).unwrap();
		let template = Subject {
			organization: Some("Widgets Ltd".into()),
			..Subject::default()
		};
		let sans = vec!["alt.example.com".to_string(), "10.0.0.1".to_string()];
		let csr_params = CsrParams::new("host.example.com", &sans, template).unwrap();
		let csr = Csr::from_pem(&csr_params.serialize_pem(&leaf_key).unwrap()).unwrap();
		let params = CertificateParams::leaf(&csr, 90).unwrap();
		let pem = params.sign_pem(&csr, &issuer).unwrap();

		let info = CertificateInfo::from_pem(&pem).unwrap();
		assert_eq!(info.subject.common_name, "host.example.com");
		assert_eq!(info.subject.organization.as_deref(), Some("Widgets Ltd"));
		assert_eq!(
			info.dns_names,
			vec!["host.example.com".to_string(), "alt.example.com".to_string()]
		);
		assert_eq!(info.ip_addresses, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
		assert_eq!(info.key_bits, 2048);
		assert!(!info.is_ca);
	}

	#[test]
	fn issuer_rejects_a_foreign_key() {
		let (_root_key, root_pem) = root_fixture();
		let other_key = KeyPair::generate(2048).unwrap();
		assert!(matches!(
			Issuer::new(&root_pem, &other_key),
			Err(Error::IssuerKeyMismatch)
		));
	}

	#[test]
	fn lifetime_recovery_inverts_the_template_adjustment() {
		let (_key, pem) = root_fixture();
		let info = CertificateInfo::from_pem(&pem).unwrap();
		assert_eq!(info.lifetime_days(), 3650);
	}

	#[test]
	fn serial_reads_back_as_hex_pairs() {
		let (_key, pem) = root_fixture();
		let info = CertificateInfo::from_pem(&pem).unwrap();
		assert!(info
			.serial
			.split(':')
			.all(|b| b.len() == 2 && b.chars().all(|c| c.is_ascii_hexdigit())));
	}
}
