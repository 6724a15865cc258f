/*!
Minimal certificate authority engine

This crate bootstraps a self-signed RSA root CA, issues leaf certificates
from PKCS#10 certificate signing requests, and renews certificates that are
nearing expiry. Everything is plain X.509: certificates and CSRs are written
directly as DER and persisted as PEM, signed with SHA-256-with-RSA.

## Example

```rust,ignore
use certmint::{CaPaths, CertificateParams, Issuer, KeyPair, Subject};

let paths = CaPaths::new("/var/lib/ca");
paths.init_directories()?;

// Bootstrap the root (once)
let root_key = KeyPair::generate(4096)?;
let root = CertificateParams::root(Subject::new("Root CA"), 3650)?;
paths.save_root_key(&root_key.to_pem(None)?)?;
paths.save_root_cert(&root.self_sign_pem(&root_key)?)?;

// Issue a leaf
let issuer = Issuer::new(&paths.load_root_cert_pem()?, &root_key)?;
certmint::issue_host(&paths, &issuer, "host.example.com", &[], Subject::default(), 2048, 90)?;
```
*/
#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::net::{IpAddr, Ipv6Addr};

use time::{Duration, OffsetDateTime, Time};
use yasna::models::{GeneralizedTime, ObjectIdentifier, UTCTime};
use yasna::{DERWriter, Tag};

mod certificate;
mod csr;
mod error;
mod key_pair;
mod oid;
mod prompt;
mod renew;
mod serial;
mod store;

pub use crate::certificate::{
	issue_host, issue_host_at, CertificateInfo, CertificateParams, IssuedCertificate, Issuer,
	KeyUsage,
};
pub use crate::csr::{Csr, CsrParams};
pub use crate::error::Error;
pub use crate::key_pair::{is_encrypted_pem, KeyPair, MIN_RSA_BITS};
pub use crate::prompt::{NoPrompt, SecretPrompt};
pub use crate::renew::{RenewalOutcome, RenewalReport, Renewer, DEFAULT_RENEWAL_THRESHOLD_DAYS};
pub use crate::serial::SerialNumber;
pub use crate::store::{load_root_key, CaPaths};

use crate::oid::*;

const ENCODE_CONFIG: pem::EncodeConfig = {
	let line_ending = match cfg!(target_family = "windows") {
		true => pem::LineEnding::CRLF,
		false => pem::LineEnding::LF,
	};
	pem::EncodeConfig::new().set_line_ending(line_ending)
};

/// The type of subject alt name
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum SanType {
	/// A DNS hostname
	DnsName(String),
	/// An IPv4 or IPv6 address
	IpAddress(IpAddr),
	/// An e-mail address; never produced by [`CsrParams`], but carried
	/// through verbatim when present in a foreign request
	Rfc822Name(String),
}

impl SanType {
	/// Classifies a requested name as an IP or DNS subject alt name.
	///
	/// Classification uses strict address parsing: a token that parses as an
	/// IPv4 or IPv6 literal becomes an IP name, everything else falls back to
	/// a DNS name. IPv6 zone-id suffixes (`fe80::1%eth0`) are accepted; the
	/// zone itself is not part of the encoded address.
	pub fn classify(token: &str) -> Self {
		if let Ok(addr) = token.parse::<IpAddr>() {
			return SanType::IpAddress(addr);
		}
		if let Some((addr, zone)) = token.split_once('%') {
			if !zone.is_empty() {
				if let Ok(v6) = addr.parse::<Ipv6Addr>() {
					return SanType::IpAddress(IpAddr::V6(v6));
				}
			}
		}
		SanType::DnsName(token.to_owned())
	}

	fn tag(&self) -> u64 {
		// Defined in the GeneralName list in
		// https://tools.ietf.org/html/rfc5280#page-38
		const TAG_RFC822_NAME: u64 = 1;
		const TAG_DNS_NAME: u64 = 2;
		const TAG_IP_ADDRESS: u64 = 7;

		match self {
			SanType::Rfc822Name(_name) => TAG_RFC822_NAME,
			SanType::DnsName(_name) => TAG_DNS_NAME,
			SanType::IpAddress(_addr) => TAG_IP_ADDRESS,
		}
	}
}

/// Naming attributes embedded in certificate subjects and requests
///
/// Only the common name is mandatory; optional attributes are omitted from
/// the encoded distinguished name when absent.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Subject {
	/// X520CommonName
	pub common_name: String,
	/// X520CountryName
	pub country: Option<String>,
	/// X520StateOrProvinceName
	pub state_or_province: Option<String>,
	/// X520LocalityName
	pub locality: Option<String>,
	/// X520OrganizationName
	pub organization: Option<String>,
	/// X520OrganizationalUnitName
	pub organizational_unit: Option<String>,
}

impl Subject {
	/// Creates a subject carrying only a common name
	pub fn new(common_name: impl Into<String>) -> Self {
		Subject {
			common_name: common_name.into(),
			..Subject::default()
		}
	}

	/// Writes the subject as an X.501 Name, one attribute per RDN.
	///
	/// The country is encoded as PrintableString per convention, everything
	/// else as UTF8String.
	fn write_der(&self, writer: DERWriter) {
		writer.write_sequence(|writer| {
			let mut write_attr = |oid: &[u64], value: &str, printable: bool| {
				if value.is_empty() {
					return;
				}
				writer.next().write_set(|writer| {
					writer.next().write_sequence(|writer| {
						writer.next().write_oid(&ObjectIdentifier::from_slice(oid));
						if printable {
							writer.next().write_printable_string(value);
						} else {
							writer.next().write_utf8_string(value);
						}
					});
				});
			};
			if let Some(country) = &self.country {
				write_attr(OID_COUNTRY_NAME, country, true);
			}
			if let Some(province) = &self.state_or_province {
				write_attr(OID_STATE_OR_PROVINCE_NAME, province, false);
			}
			if let Some(locality) = &self.locality {
				write_attr(OID_LOCALITY_NAME, locality, false);
			}
			if let Some(organization) = &self.organization {
				write_attr(OID_ORG_NAME, organization, false);
			}
			if let Some(unit) = &self.organizational_unit {
				write_attr(OID_ORG_UNIT_NAME, unit, false);
			}
			write_attr(OID_COMMON_NAME, &self.common_name, false);
		});
	}

	fn from_x509_name(name: &x509_parser::x509::X509Name) -> Result<Self, Error> {
		let attr = |res: Option<&x509_parser::x509::AttributeTypeAndValue>| -> Result<Option<String>, Error> {
			match res {
				Some(attr) => {
					let s = attr
						.as_str()
						.map_err(|_| Error::CertFormat("non-string subject attribute".into()))?;
					Ok(Some(s.to_owned()))
				},
				None => Ok(None),
			}
		};
		let common_name = attr(name.iter_common_name().next())?.unwrap_or_default();
		Ok(Subject {
			common_name,
			country: attr(name.iter_country().next())?,
			state_or_province: attr(name.iter_state_or_province().next())?,
			locality: attr(name.iter_locality().next())?,
			organization: attr(name.iter_organization().next())?,
			organizational_unit: attr(name.iter_organizational_unit().next())?,
		})
	}
}

/// Computes the certificate validity window for a lifetime in days.
///
/// The window ends one second before the full-day boundary, so a one day
/// certificate issued at midnight expires at 23:59:59 the same day.
/// Sub-second precision is stripped since RFC 5280 forbids fractional
/// seconds in validity timestamps.
pub(crate) fn validity_window(
	not_before: OffsetDateTime,
	lifetime_days: u32,
) -> (OffsetDateTime, OffsetDateTime) {
	let not_before = dt_strip_nanos(not_before);
	let not_after = not_before + Duration::days(i64::from(lifetime_days)) - Duration::seconds(1);
	(not_before, not_after)
}

fn dt_strip_nanos(dt: OffsetDateTime) -> OffsetDateTime {
	// UTCTime cannot express fractional seconds, and RFC 5280 section
	// 4.1.2.5.2 forbids them in GeneralizedTime as well
	let time =
		Time::from_hms(dt.hour(), dt.minute(), dt.second()).expect("invalid or out-of-range time");
	dt.replace_time(time)
}

fn write_dt_utc_or_generalized(writer: DERWriter, dt: OffsetDateTime) {
	// RFC 5280 requires dates below 2050 to be written as UTCTime and
	// anything starting from 2050 as GeneralizedTime; UTCTime also cannot
	// represent dates before 1950
	let dt = dt_strip_nanos(dt);
	if (1950..2050).contains(&dt.year()) {
		let ut = UTCTime::from_datetime(dt);
		writer.write_utctime(&ut);
	} else {
		let gt = GeneralizedTime::from_datetime(dt);
		writer.write_generalized_time(&gt);
	}
}

/// Serializes an X.509v3 extension according to RFC 5280
fn write_x509_extension(
	writer: DERWriter,
	extension_oid: &[u64],
	is_critical: bool,
	value_serializer: impl FnOnce(DERWriter),
) {
	writer.write_sequence(|writer| {
		let oid = ObjectIdentifier::from_slice(extension_oid);
		writer.next().write_oid(&oid);
		if is_critical {
			writer.next().write_bool(true);
		}
		let bytes = yasna::construct_der(value_serializer);
		writer.next().write_bytes(&bytes);
	})
}

fn write_san_extension(writer: DERWriter, subject_alt_names: &[SanType]) {
	write_x509_extension(writer, OID_SUBJECT_ALT_NAME, false, |writer| {
		writer.write_sequence(|writer| {
			for san in subject_alt_names {
				writer.next().write_tagged_implicit(
					Tag::context(san.tag()),
					|writer| match san {
						SanType::Rfc822Name(name) | SanType::DnsName(name) => {
							writer.write_ia5_string(name)
						},
						SanType::IpAddress(IpAddr::V4(addr)) => writer.write_bytes(&addr.octets()),
						SanType::IpAddress(IpAddr::V6(addr)) => writer.write_bytes(&addr.octets()),
					},
				);
			}
		});
	});
}

/// AlgorithmIdentifier for sha256WithRSAEncryption, parameters NULL
fn write_signature_algorithm(writer: DERWriter) {
	writer.write_sequence(|writer| {
		writer
			.next()
			.write_oid(&ObjectIdentifier::from_slice(OID_SHA256_WITH_RSA_ENCRYPTION));
		writer.next().write_null();
	});
}

/// SubjectPublicKeyInfo wrapping a PKCS#1 RSAPublicKey
fn write_subject_public_key_info(writer: DERWriter, rsa_public_key_der: &[u8]) {
	writer.write_sequence(|writer| {
		writer.next().write_sequence(|writer| {
			writer
				.next()
				.write_oid(&ObjectIdentifier::from_slice(OID_RSA_ENCRYPTION));
			writer.next().write_null();
		});
		writer
			.next()
			.write_bitvec_bytes(rsa_public_key_der, rsa_public_key_der.len() * 8);
	});
}

/// Subject key identifier as per RFC 7093 method 1: SHA-256 over the
/// public key bits, truncated to 20 bytes
fn key_identifier(rsa_public_key_der: &[u8]) -> Vec<u8> {
	let digest = ring::digest::digest(&ring::digest::SHA256, rsa_public_key_der);
	digest.as_ref()[0..20].to_vec()
}
