//! YAML configuration.
//!
//! Every field has an explicit default applied at deserialization time, so a
//! partial (or missing) configuration file behaves exactly like one spelling
//! the defaults out.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// CA manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Key generation and subject defaults
	pub key: KeyConfig,
	/// Filesystem settings
	pub file: FileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
	/// RSA modulus size for new keys
	pub bits: usize,
	/// Certificate lifetime in days
	pub lifetime: u32,
	/// Common name of the root certificate
	#[serde(rename = "commonname")]
	pub common_name: String,
	/// Optional subject attributes; empty means absent
	pub country: String,
	pub province: String,
	pub locality: String,
	pub organization: String,
	#[serde(rename = "unit")]
	pub organizational_unit: String,
}

impl Default for KeyConfig {
	fn default() -> Self {
		KeyConfig {
			bits: 4096,
			lifetime: 3650,
			common_name: "Root CA".to_owned(),
			country: String::new(),
			province: String::new(),
			locality: String::new(),
			organization: String::new(),
			organizational_unit: String::new(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
	/// Base directory of the trust domain; a leading `~` refers to the
	/// invoking user's home directory
	#[serde(rename = "basedir")]
	pub base_dir: String,
}

impl Default for FileConfig {
	fn default() -> Self {
		FileConfig {
			base_dir: "~/.ca".to_owned(),
		}
	}
}

impl Config {
	/// Loads the configuration.
	///
	/// An explicitly requested file must exist; without one, the default
	/// location is consulted and silently skipped when absent.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let (path, explicit) = match path {
			Some(path) => (path.to_path_buf(), true),
			None => (default_path()?, false),
		};
		if !path.exists() {
			if explicit {
				anyhow::bail!("configuration file {} does not exist", path.display());
			}
			return Ok(Config::default());
		}
		let content = fs::read_to_string(&path)
			.with_context(|| format!("could not read {}", path.display()))?;
		serde_yaml::from_str(&content)
			.with_context(|| format!("could not parse {}", path.display()))
	}

	/// The resolved base directory, `~` expanded
	pub fn base_dir(&self) -> Result<PathBuf> {
		expand_tilde(&self.file.base_dir)
	}

	/// Subject attributes as configured; empty strings become absent
	pub fn subject(&self) -> certmint::Subject {
		let opt = |s: &str| (!s.is_empty()).then(|| s.to_owned());
		certmint::Subject {
			common_name: self.key.common_name.clone(),
			country: opt(&self.key.country),
			state_or_province: opt(&self.key.province),
			locality: opt(&self.key.locality),
			organization: opt(&self.key.organization),
			organizational_unit: opt(&self.key.organizational_unit),
		}
	}
}

fn default_path() -> Result<PathBuf> {
	let dirs = directories::ProjectDirs::from("", "", "certmint")
		.context("could not determine the configuration directory")?;
	Ok(dirs.config_dir().join("config.yaml"))
}

fn expand_tilde(raw: &str) -> Result<PathBuf> {
	let Some(rest) = raw.strip_prefix('~') else {
		return Ok(PathBuf::from(raw));
	};
	let base = directories::BaseDirs::new().context("could not determine the home directory")?;
	Ok(base.home_dir().join(rest.trim_start_matches(['/', '\\'])))
}
