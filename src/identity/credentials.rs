//! Ambient AWS credential discovery.

// self
use crate::{_prelude::*, auth::Sensitive, config::EnvLookup};

/// Long-term or session credentials used to sign identity assertions.
#[derive(Clone)]
pub struct AwsCredentials {
	/// Access key identifier.
	pub access_key_id: String,
	/// Secret access key; never logged.
	pub secret_access_key: Sensitive,
	/// Session token for temporary credentials.
	pub session_token: Option<Sensitive>,
}
impl Debug for AwsCredentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AwsCredentials")
			.field("access_key_id", &self.access_key_id)
			.field("secret_access_key", &"<redacted>")
			.field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Source of [`AwsCredentials`], consulted once per login attempt.
pub trait CredentialSource
where
	Self: Send + Sync,
{
	/// Returns the current credentials or [`Error::NoAmbientCredentials`].
	fn credentials(&self) -> Result<AwsCredentials>;
}

/// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and `AWS_SESSION_TOKEN`
/// (falling back to `AWS_SECURITY_TOKEN`).
#[derive(Clone)]
pub struct EnvCredentialSource {
	lookup: EnvLookup,
}
impl EnvCredentialSource {
	/// Reads the process environment.
	pub fn new() -> Self {
		Self::with_lookup(crate::config::process_env())
	}

	/// Reads through a custom lookup.
	pub fn with_lookup(lookup: EnvLookup) -> Self {
		Self { lookup }
	}

	fn var(&self, name: &str) -> Option<String> {
		(self.lookup)(name).filter(|value| !value.trim().is_empty())
	}
}
impl Default for EnvCredentialSource {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for EnvCredentialSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("EnvCredentialSource(..)")
	}
}
impl CredentialSource for EnvCredentialSource {
	fn credentials(&self) -> Result<AwsCredentials> {
		let access_key_id = self.var("AWS_ACCESS_KEY_ID").ok_or_else(|| {
			Error::NoAmbientCredentials { reason: "AWS_ACCESS_KEY_ID is not set".into() }
		})?;
		let secret_access_key = self.var("AWS_SECRET_ACCESS_KEY").ok_or_else(|| {
			Error::NoAmbientCredentials { reason: "AWS_SECRET_ACCESS_KEY is not set".into() }
		})?;
		let session_token =
			self.var("AWS_SESSION_TOKEN").or_else(|| self.var("AWS_SECURITY_TOKEN"));

		Ok(AwsCredentials {
			access_key_id,
			secret_access_key: Sensitive::new(secret_access_key),
			session_token: session_token.map(Sensitive::new),
		})
	}
}

/// Fixed credentials, for tests and demos.
#[derive(Clone, Debug)]
pub struct StaticCredentialSource(pub AwsCredentials);
impl CredentialSource for StaticCredentialSource {
	fn credentials(&self) -> Result<AwsCredentials> {
		Ok(self.0.clone())
	}
}
