use std::fmt;

use ring::rand::{SecureRandom, SystemRandom};

use crate::Error;

/// Serials are 128 bit, the widest size RFC 5280 allows without truncation
const SERIAL_LEN: usize = 16;

/// A certificate serial number
///
/// Serials are drawn uniformly at random from the full 128 bit space; there
/// is no persisted allocation registry, the entropy width alone makes a
/// collision within one trust domain negligible.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct SerialNumber {
	inner: Vec<u8>,
}

impl SerialNumber {
	/// Draws a fresh serial number from the system's secure random source
	pub fn generate() -> Result<SerialNumber, Error> {
		let mut bytes = [0u8; SERIAL_LEN];
		SystemRandom::new()
			.fill(&mut bytes)
			.map_err(|_| Error::Entropy("could not draw serial number".into()))?;
		Ok(SerialNumber {
			inner: bytes.to_vec(),
		})
	}

	/// Create a serial number from the given byte slice
	pub fn from_slice(bytes: &[u8]) -> SerialNumber {
		SerialNumber {
			inner: bytes.to_vec(),
		}
	}

	/// Return the length of the serial number in bytes
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	/// Whether the serial is empty (never the case for generated serials)
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}
}

impl fmt::Display for SerialNumber {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
		let hex: Vec<_> = self.inner.iter().map(|b| format!("{:02x}", b)).collect();
		write!(f, "{}", hex.join(":"))
	}
}

impl AsRef<[u8]> for SerialNumber {
	fn as_ref(&self) -> &[u8] {
		&self.inner
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;

	#[test]
	fn serials_are_128_bit() {
		let serial = SerialNumber::generate().unwrap();
		assert_eq!(serial.len(), 16);
	}

	#[test]
	fn serials_do_not_collide() {
		let mut seen = HashSet::new();
		for _ in 0..10_000 {
			let serial = SerialNumber::generate().unwrap();
			assert!(seen.insert(serial.as_ref().to_vec()));
		}
	}

	#[test]
	fn display_is_colon_separated_hex() {
		let serial = SerialNumber::from_slice(&[0x00, 0xab, 0x10]);
		assert_eq!(serial.to_string(), "00:ab:10");
	}
}
