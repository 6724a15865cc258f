use time::OffsetDateTime;

use crate::certificate::{issue_host_at, CertificateInfo, Issuer};
use crate::{CaPaths, Error, KeyPair};

/// Certificates with fewer whole days left than this are due for renewal
pub const DEFAULT_RENEWAL_THRESHOLD_DAYS: i64 = 30;

/// What happened to one tracked certificate during a renewal pass
#[derive(Debug)]
pub enum RenewalOutcome {
	/// The certificate was due and has been replaced
	Renewed {
		/// Serial number of the replacement certificate
		serial: String,
		/// New expiry
		not_after: OffsetDateTime,
	},
	/// The certificate still has enough lifetime left and was not touched
	Current {
		/// Whole days until expiry
		days_left: i64,
	},
	/// Renewal of this certificate failed; the rest of the batch proceeds
	Failed(Error),
}

/// Result of one renewal pass over the trust domain
#[derive(Debug)]
pub struct RenewalReport {
	/// Whole days until the root certificate itself expires; the engine
	/// reports this but never renews the root
	pub root_days_left: i64,
	/// Per-host outcomes, in directory order
	pub outcomes: Vec<(String, RenewalOutcome)>,
}

impl RenewalReport {
	/// Number of failed renewals in this pass
	pub fn failures(&self) -> usize {
		self.outcomes
			.iter()
			.filter(|(_, outcome)| matches!(outcome, RenewalOutcome::Failed(_)))
			.count()
	}
}

/// The renewal engine
///
/// Inspects every tracked certificate and re-runs the full issuance
/// pipeline, with the original request parameters recovered from the old
/// certificate, for any that fall below the expiry threshold. A certificate
/// that cannot be read or re-issued is reported and skipped; one corrupt
/// host record must not abort renewal for the rest.
pub struct Renewer<'a> {
	paths: &'a CaPaths,
	issuer: Issuer<'a>,
	root: CertificateInfo,
	threshold_days: i64,
}

impl<'a> Renewer<'a> {
	/// Prepares a renewal pass.
	///
	/// Reading the root certificate is the one fail-fast step: without a
	/// valid root nothing can be renewed.
	pub fn new(
		paths: &'a CaPaths,
		root_key: &'a KeyPair,
		threshold_days: i64,
	) -> Result<Self, Error> {
		let root_pem = paths.load_root_cert_pem()?;
		let root = CertificateInfo::from_pem(&root_pem)?;
		let issuer = Issuer::new(&root_pem, root_key)?;
		Ok(Renewer {
			paths,
			issuer,
			root,
			threshold_days,
		})
	}

	/// Runs a renewal pass against the wall clock
	pub fn run(&self) -> Result<RenewalReport, Error> {
		self.run_at(OffsetDateTime::now_utc())
	}

	/// Runs a renewal pass against an explicit clock
	pub fn run_at(&self, now: OffsetDateTime) -> Result<RenewalReport, Error> {
		let mut outcomes = Vec::new();
		for name in self.paths.tracked_names()? {
			let outcome = self
				.renew_one(&name, now)
				.unwrap_or_else(RenewalOutcome::Failed);
			outcomes.push((name, outcome));
		}
		Ok(RenewalReport {
			root_days_left: self.root.days_until_expiry(now),
			outcomes,
		})
	}

	fn renew_one(&self, name: &str, now: OffsetDateTime) -> Result<RenewalOutcome, Error> {
		let info = CertificateInfo::from_pem(&self.paths.load_host_cert_pem(name)?)?;
		let days_left = info.days_until_expiry(now);
		if days_left >= self.threshold_days {
			return Ok(RenewalOutcome::Current { days_left });
		}

		// Reconstruct the original request: the common name re-enters the
		// alt names through the request builder, so it is excluded here to
		// avoid duplicating it
		let common_name = &info.subject.common_name;
		let mut sans: Vec<String> = info
			.dns_names
			.iter()
			.filter(|dns| *dns != common_name)
			.cloned()
			.collect();
		let cn_ip = common_name.parse::<std::net::IpAddr>().ok();
		sans.extend(
			info.ip_addresses
				.iter()
				.filter(|ip| Some(**ip) != cn_ip)
				.map(|ip| ip.to_string()),
		);

		let issued = issue_host_at(
			self.paths,
			&self.issuer,
			common_name,
			&sans,
			info.subject.clone(),
			info.key_bits,
			info.lifetime_days(),
			now,
		)?;
		Ok(RenewalOutcome::Renewed {
			serial: issued.serial,
			not_after: issued.not_after,
		})
	}
}
