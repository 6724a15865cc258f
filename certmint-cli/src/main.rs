//! certmint — a minimal certificate authority manager.

mod args;
mod config;

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use certmint::{
	issue_host, load_root_key, CaPaths, CertificateParams, Issuer, KeyPair, RenewalOutcome,
	Renewer, SecretPrompt,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Terminal-backed secret prompt for interactive runs
struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
	fn prompt_secret(&self, prompt: &str) -> io::Result<String> {
		rpassword::prompt_password(prompt)
	}
}

fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_target(false)
		.without_time()
		.init();

	let opts = args::options().run();
	match run(opts) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("error: {err:#}");
			ExitCode::FAILURE
		},
	}
}

fn run(opts: args::Options) -> Result<()> {
	let conf = Config::load(opts.config.as_deref())?;
	let paths = CaPaths::new(conf.base_dir()?);
	match opts.command {
		args::Command::Init { force, encrypt } => init(&conf, &paths, force, encrypt),
		args::Command::New {
			san,
			lifetime,
			bits,
			name,
		} => new_certificate(&conf, &paths, &name, &san, lifetime, bits),
		args::Command::Renew { threshold } => renew(&paths, threshold),
	}
}

fn init(conf: &Config, paths: &CaPaths, force: bool, encrypt: bool) -> Result<()> {
	paths.init_directories()?;
	if paths.root_exists() {
		if !force {
			info!(
				"root CA already exists in {}, nothing to do (use --force to replace it)",
				paths.base().display()
			);
			return Ok(());
		}
		let replace = confirm(
			"Replace the existing root CA? Every certificate it issued becomes untrusted",
		)?;
		if !replace {
			info!("keeping the existing root CA");
			return Ok(());
		}
	}

	let secret = if encrypt {
		Some(choose_passphrase()?)
	} else {
		None
	};

	info!("generating {} bit root key", conf.key.bits);
	let root_key = KeyPair::generate(conf.key.bits)?;
	let params = CertificateParams::root(conf.subject(), conf.key.lifetime)?;
	let cert_pem = params.self_sign_pem(&root_key)?;

	paths.save_root_key(&root_key.to_pem(secret.as_deref())?)?;
	info!("saved root key to {}", paths.root_key_path().display());
	paths.save_root_cert(&cert_pem)?;
	info!(
		"saved root certificate {} to {}, valid until {}",
		params.serial_number,
		paths.root_cert_path().display(),
		params.not_after
	);
	Ok(())
}

fn new_certificate(
	conf: &Config,
	paths: &CaPaths,
	name: &str,
	sans: &[String],
	lifetime: Option<u32>,
	bits: Option<usize>,
) -> Result<()> {
	if !paths.root_exists() {
		bail!(
			"no root CA in {}, run `certmint init` first",
			paths.base().display()
		);
	}
	let root_key = load_root_key_interactive(paths)?;
	let issuer = Issuer::new(&paths.load_root_cert_pem()?, &root_key)?;

	let bits = bits.unwrap_or(conf.key.bits);
	let lifetime = lifetime.unwrap_or(conf.key.lifetime);
	info!("generating {bits} bit key and certificate request for {name}");
	let issued = issue_host(paths, &issuer, name, sans, conf.subject(), bits, lifetime)?;
	info!(
		"issued certificate {} for {name}, valid until {}",
		issued.serial, issued.not_after
	);
	Ok(())
}

fn renew(paths: &CaPaths, threshold: i64) -> Result<()> {
	let root_key = load_root_key_interactive(paths)?;
	let renewer = Renewer::new(paths, &root_key, threshold)
		.context("could not load the root certificate")?;
	let report = renewer.run()?;

	if report.root_days_left < threshold {
		warn!(
			"root certificate expires in {} days; it will not be renewed automatically",
			report.root_days_left
		);
	} else {
		info!("root certificate expires in {} days", report.root_days_left);
	}

	for (name, outcome) in &report.outcomes {
		match outcome {
			RenewalOutcome::Renewed { serial, not_after } => {
				info!("renewed {name}: certificate {serial}, valid until {not_after}");
			},
			RenewalOutcome::Current { days_left } => {
				info!("{name} expires in {days_left} days, leaving it alone");
			},
			RenewalOutcome::Failed(err) => {
				warn!("renewing {name} failed: {err}");
			},
		}
	}

	let failures = report.failures();
	if failures > 0 {
		bail!("{failures} of {} renewals failed", report.outcomes.len());
	}
	Ok(())
}

/// Loads the root key, re-prompting on a wrong passphrase instead of
/// giving up on the first typo
fn load_root_key_interactive(paths: &CaPaths) -> Result<KeyPair> {
	let mut attempts = 0;
	loop {
		match load_root_key(paths, &TerminalPrompt) {
			Err(certmint::Error::Decryption) if attempts < 2 => {
				attempts += 1;
				warn!("wrong passphrase, try again");
			},
			other => return other.context("could not load the root key"),
		}
	}
}

fn confirm(question: &str) -> Result<bool> {
	print!("{question} [y/N] ");
	io::stdout().flush()?;
	let mut answer = String::new();
	io::stdin().read_line(&mut answer)?;
	Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn choose_passphrase() -> Result<String> {
	let prompt = TerminalPrompt;
	let first = prompt.prompt_secret("Root key passphrase: ")?;
	if first.is_empty() {
		bail!("passphrase must not be empty");
	}
	let second = prompt.prompt_secret("Repeat passphrase: ")?;
	if first != second {
		bail!("passphrases do not match");
	}
	Ok(first)
}
