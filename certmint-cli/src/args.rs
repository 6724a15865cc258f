//! Command Line argument parsing
#![allow(missing_docs)]

use std::path::PathBuf;

use bpaf::Bpaf;

#[derive(Clone, Debug, Bpaf)]
#[bpaf(options, version)]
/// certmint certificate authority manager
pub struct Options {
	/// Path to the YAML configuration file
	#[bpaf(short, long, argument("config.yaml"))]
	pub config: Option<PathBuf>,
	#[bpaf(external)]
	pub command: Command,
}

#[derive(Clone, Debug, Bpaf)]
pub enum Command {
	/// Bootstrap the root CA key and certificate
	#[bpaf(command)]
	Init {
		/// Replace an existing root CA (asks for confirmation)
		#[bpaf(long)]
		force: bool,
		/// Protect the root key with a passphrase
		#[bpaf(long)]
		encrypt: bool,
	},
	/// Issue a certificate for a host
	#[bpaf(command)]
	New {
		/// Subject Alternative Name (apply multiple times for multiple names/IPs)
		#[bpaf(many, long, argument::<String>("san"))]
		san: Vec<String>,
		/// Certificate lifetime in days (defaults to the configured lifetime)
		#[bpaf(long, argument("DAYS"))]
		lifetime: Option<u32>,
		/// RSA key size in bits (defaults to the configured size)
		#[bpaf(long, argument("BITS"))]
		bits: Option<usize>,
		/// Hostname or IP address to issue for
		#[bpaf(positional("NAME"))]
		name: String,
	},
	/// Renew every tracked certificate nearing expiry
	#[bpaf(command)]
	Renew {
		/// Renew certificates with fewer than this many days left
		#[bpaf(long, argument("DAYS"), fallback(certmint::DEFAULT_RENEWAL_THRESHOLD_DAYS), display_fallback)]
		threshold: i64,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_the_new_command() {
		let args = [
			"new",
			"--san",
			"alt.example.com",
			"--san",
			"10.0.0.1",
			"--lifetime",
			"90",
			"host.example.com",
		];
		let parsed = options().run_inner(&args[..]).unwrap();
		match parsed.command {
			Command::New {
				san,
				lifetime,
				bits,
				name,
			} => {
				assert_eq!(san, vec!["alt.example.com", "10.0.0.1"]);
				assert_eq!(lifetime, Some(90));
				assert_eq!(bits, None);
				assert_eq!(name, "host.example.com");
			},
			other => panic!("unexpected command {other:?}"),
		}
	}

	#[test]
	fn renew_threshold_defaults_to_thirty_days() {
		let parsed = options().run_inner(&["renew"][..]).unwrap();
		match parsed.command {
			Command::Renew { threshold } => assert_eq!(threshold, 30),
			other => panic!("unexpected command {other:?}"),
		}
	}
}
