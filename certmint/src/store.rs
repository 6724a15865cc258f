use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{Error, KeyPair, SecretPrompt};

const ROOT_KEY_FILE: &str = "ca.pem";
const ROOT_CERT_FILE: &str = "ca.crt";
const PRIVATE_DIR: &str = "private";
const CERTIFICATES_DIR: &str = "certificates";

#[cfg(unix)]
const MODE_PRIVATE: u32 = 0o600;
#[cfg(unix)]
const MODE_PUBLIC: u32 = 0o644;

/// Filesystem layout of one trust domain
///
/// Everything lives under a single base directory:
///
/// ```text
/// <base>/private/ca.pem                   root private key (0600)
/// <base>/certificates/ca.crt              root certificate (0644)
/// <base>/certificates/<name>/<name>.pem   leaf private key (0600)
/// <base>/certificates/<name>/<name>.csr   leaf request (0600)
/// <base>/certificates/<name>/<name>.crt   leaf certificate (0644)
/// ```
///
/// The base directory must already be resolved; tilde expansion is the
/// caller's concern so that no process-wide home lookup hides in here.
#[derive(Debug, Clone)]
pub struct CaPaths {
	base: PathBuf,
}

impl CaPaths {
	/// Creates a layout rooted at `base`
	pub fn new(base: impl Into<PathBuf>) -> Self {
		CaPaths { base: base.into() }
	}

	/// The base directory
	pub fn base(&self) -> &Path {
		&self.base
	}

	/// Creates the base, private and certificates directories
	pub fn init_directories(&self) -> Result<(), Error> {
		fs::create_dir_all(&self.base)?;
		fs::create_dir_all(self.base.join(PRIVATE_DIR))?;
		fs::create_dir_all(self.base.join(CERTIFICATES_DIR))?;
		Ok(())
	}

	/// Path of the root private key
	pub fn root_key_path(&self) -> PathBuf {
		self.base.join(PRIVATE_DIR).join(ROOT_KEY_FILE)
	}

	/// Path of the root certificate
	pub fn root_cert_path(&self) -> PathBuf {
		self.base.join(CERTIFICATES_DIR).join(ROOT_CERT_FILE)
	}

	/// Whether a root key or certificate is already present
	pub fn root_exists(&self) -> bool {
		self.root_key_path().exists() || self.root_cert_path().exists()
	}

	fn host_dir(&self, name: &str) -> Result<PathBuf, Error> {
		validate_name(name)?;
		Ok(self.base.join(CERTIFICATES_DIR).join(name))
	}

	/// Path of a host's private key
	pub fn host_key_path(&self, name: &str) -> Result<PathBuf, Error> {
		Ok(self.host_dir(name)?.join(format!("{name}.pem")))
	}

	/// Path of a host's certificate request
	pub fn host_csr_path(&self, name: &str) -> Result<PathBuf, Error> {
		Ok(self.host_dir(name)?.join(format!("{name}.csr")))
	}

	/// Path of a host's certificate
	pub fn host_cert_path(&self, name: &str) -> Result<PathBuf, Error> {
		Ok(self.host_dir(name)?.join(format!("{name}.crt")))
	}

	/// Saves the root private key with owner-only permissions
	pub fn save_root_key(&self, pem: &str) -> Result<(), Error> {
		write_private(&self.root_key_path(), pem.as_bytes())?;
		Ok(())
	}

	/// Reads the root private key PEM
	pub fn load_root_key_pem(&self) -> Result<String, Error> {
		Ok(fs::read_to_string(self.root_key_path())?)
	}

	/// Saves the root certificate world-readable
	pub fn save_root_cert(&self, pem: &str) -> Result<(), Error> {
		write_public(&self.root_cert_path(), pem.as_bytes())?;
		Ok(())
	}

	/// Reads the root certificate PEM
	pub fn load_root_cert_pem(&self) -> Result<String, Error> {
		Ok(fs::read_to_string(self.root_cert_path())?)
	}

	/// Saves a host's private key with owner-only permissions, creating the
	/// host directory as needed
	pub fn save_host_key(&self, name: &str, pem: &str) -> Result<(), Error> {
		let path = self.host_key_path(name)?;
		ensure_parent(&path)?;
		write_private(&path, pem.as_bytes())?;
		Ok(())
	}

	/// Saves a host's certificate request with owner-only permissions
	pub fn save_host_csr(&self, name: &str, pem: &str) -> Result<(), Error> {
		let path = self.host_csr_path(name)?;
		ensure_parent(&path)?;
		write_private(&path, pem.as_bytes())?;
		Ok(())
	}

	/// Saves a host's certificate world-readable
	pub fn save_host_cert(&self, name: &str, pem: &str) -> Result<(), Error> {
		let path = self.host_cert_path(name)?;
		ensure_parent(&path)?;
		write_public(&path, pem.as_bytes())?;
		Ok(())
	}

	/// Reads a host's certificate PEM
	pub fn load_host_cert_pem(&self, name: &str) -> Result<String, Error> {
		Ok(fs::read_to_string(self.host_cert_path(name)?)?)
	}

	/// Names of all tracked hosts, one per subdirectory of the certificates
	/// directory, sorted
	pub fn tracked_names(&self) -> Result<Vec<String>, Error> {
		let mut names = Vec::new();
		for entry in fs::read_dir(self.base.join(CERTIFICATES_DIR))? {
			let entry = entry?;
			if !entry.file_type()?.is_dir() {
				continue;
			}
			if let Some(name) = entry.file_name().to_str() {
				names.push(name.to_owned());
			}
		}
		names.sort();
		Ok(names)
	}
}

/// Loads the root private key, asking `prompt` for the passphrase only when
/// the stored key is actually encrypted
pub fn load_root_key(paths: &CaPaths, prompt: &dyn SecretPrompt) -> Result<KeyPair, Error> {
	let pem = paths.load_root_key_pem()?;
	if crate::is_encrypted_pem(&pem)? {
		let secret = prompt.prompt_secret("Root key passphrase: ")?;
		KeyPair::from_pem(&pem, Some(&secret))
	} else {
		KeyPair::from_pem(&pem, None)
	}
}

/// Host names become directory names, so anything that walks the tree is out
fn validate_name(name: &str) -> Result<(), Error> {
	if name.is_empty()
		|| name == "."
		|| name == ".."
		|| name.contains('/')
		|| name.contains('\\')
	{
		return Err(Error::InvalidName(name.to_owned()));
	}
	Ok(())
}

fn ensure_parent(path: &Path) -> io::Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	Ok(())
}

#[cfg(unix)]
fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
	use std::os::unix::fs::PermissionsExt;
	fs::write(path, contents)?;
	fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
	#[cfg(unix)]
	return write_with_mode(path, contents, MODE_PRIVATE);
	#[cfg(not(unix))]
	return fs::write(path, contents);
}

fn write_public(path: &Path, contents: &[u8]) -> io::Result<()> {
	#[cfg(unix)]
	return write_with_mode(path, contents, MODE_PUBLIC);
	#[cfg(not(unix))]
	return fs::write(path, contents);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn layout_matches_the_documented_shape() {
		let paths = CaPaths::new("/srv/ca");
		assert_eq!(paths.root_key_path(), Path::new("/srv/ca/private/ca.pem"));
		assert_eq!(
			paths.root_cert_path(),
			Path::new("/srv/ca/certificates/ca.crt")
		);
		assert_eq!(
			paths.host_cert_path("host.example.com").unwrap(),
			Path::new("/srv/ca/certificates/host.example.com/host.example.com.crt")
		);
		assert_eq!(
			paths.host_key_path("host.example.com").unwrap(),
			Path::new("/srv/ca/certificates/host.example.com/host.example.com.pem")
		);
		assert_eq!(
			paths.host_csr_path("host.example.com").unwrap(),
			Path::new("/srv/ca/certificates/host.example.com/host.example.com.csr")
		);
	}

	#[test]
	fn traversing_names_are_rejected() {
		let paths = CaPaths::new("/srv/ca");
		assert!(matches!(
			paths.host_key_path("../escape"),
			Err(Error::InvalidName(_))
		));
		assert!(matches!(
			paths.host_key_path(".."),
			Err(Error::InvalidName(_))
		));
		assert!(matches!(paths.host_key_path(""), Err(Error::InvalidName(_))));
	}

	#[test]
	fn tracked_names_lists_host_directories_only() {
		let temp = assert_fs::TempDir::new().unwrap();
		let paths = CaPaths::new(temp.path());
		paths.init_directories().unwrap();
		paths.save_root_cert("cert").unwrap();
		paths.save_host_cert("b.example.com", "cert").unwrap();
		paths.save_host_cert("a.example.com", "cert").unwrap();

		// ca.crt is a file, not a tracked host
		assert_eq!(
			paths.tracked_names().unwrap(),
			vec!["a.example.com".to_string(), "b.example.com".to_string()]
		);
	}

	#[cfg(unix)]
	#[test]
	fn private_files_are_owner_only() {
		use std::os::unix::fs::PermissionsExt;

		let temp = assert_fs::TempDir::new().unwrap();
		let paths = CaPaths::new(temp.path());
		paths.init_directories().unwrap();
		paths.save_root_key("key").unwrap();
		paths.save_host_cert("host", "cert").unwrap();

		let key_mode = fs::metadata(paths.root_key_path())
			.unwrap()
			.permissions()
			.mode();
		assert_eq!(key_mode & 0o777, 0o600);

		let cert_mode = fs::metadata(paths.host_cert_path("host").unwrap())
			.unwrap()
			.permissions()
			.mode();
		assert_eq!(cert_mode & 0o777, 0o644);
	}
}
