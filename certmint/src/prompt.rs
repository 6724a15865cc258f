use std::io;

/// Capability for obtaining a secret from the operator
///
/// The engine itself never performs terminal I/O; anything that may need a
/// passphrase (loading an encrypted root key, choosing one at bootstrap)
/// takes an implementation of this trait instead. Interactive callers wire
/// in a terminal prompt, tests and headless callers a canned value or
/// [`NoPrompt`].
pub trait SecretPrompt {
	/// Asks the operator for a secret, without echoing it
	fn prompt_secret(&self, prompt: &str) -> io::Result<String>;
}

/// Prompt for non-interactive contexts: always declines
pub struct NoPrompt;

impl SecretPrompt for NoPrompt {
	fn prompt_secret(&self, _prompt: &str) -> io::Result<String> {
		Err(io::Error::new(
			io::ErrorKind::Unsupported,
			"a passphrase is required but no interactive prompt is available",
		))
	}
}

impl<F> SecretPrompt for F
where
	F: Fn(&str) -> io::Result<String>,
{
	fn prompt_secret(&self, prompt: &str) -> io::Result<String> {
		self(prompt)
	}
}
