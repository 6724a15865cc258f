use std::io;

/// Errors that can occur while managing the certificate authority
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The cryptographically secure random source failed
	#[error("random source failure: {0}")]
	Entropy(String),
	/// RSA key generation failed
	#[error("key generation failed: {0}")]
	KeyGeneration(String),
	/// The requested RSA modulus size is below the supported minimum
	#[error("unsupported RSA key size: {0} bits (minimum is {min})", min = crate::key_pair::MIN_RSA_BITS)]
	UnsupportedKeySize(usize),
	/// A persisted private key could not be parsed
	#[error("malformed private key: {0}")]
	KeyFormat(String),
	/// An encrypted private key could not be decrypted
	#[error("could not decrypt private key: wrong or missing password")]
	Decryption,
	/// A persisted certificate request was not valid PEM
	#[error("malformed certificate request PEM")]
	CsrFormat,
	/// A certificate request's DER contents could not be parsed,
	/// or its self-signature did not verify
	#[error("could not parse certificate request: {0}")]
	CsrParse(String),
	/// A persisted certificate could not be parsed
	#[error("could not parse certificate: {0}")]
	CertFormat(String),
	/// The crypto backend rejected a signing operation
	#[error("signing failed: {0}")]
	Signing(String),
	/// The issuer private key does not belong to the issuer certificate
	#[error("issuer key does not match the issuer certificate")]
	IssuerKeyMismatch,
	/// An empty or otherwise unusable name was supplied
	#[error("invalid name: {0:?}")]
	InvalidName(String),
	/// Filesystem failure
	#[error(transparent)]
	Io(#[from] io::Error),
}
