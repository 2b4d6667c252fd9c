//! Redacting wrapper for tokens, passwords, and other sensitive strings.

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Sensitive string that never shows its value through `Debug` or `Display`.
///
/// Equality runs in time independent of where the values differ. Use
/// [`fingerprint`](Self::fingerprint) when two log lines need to be correlated to one value.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sensitive(String);
impl Sensitive {
	const FINGERPRINT_BYTES: usize = 4;

	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Short hex prefix of the value's SHA-256, safe to log.
	pub fn fingerprint(&self) -> String {
		let digest = Sha256::digest(self.0.as_bytes());

		hex::encode(&digest[..Self::FINGERPRINT_BYTES])
	}
}
impl AsRef<str> for Sensitive {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl PartialEq for Sensitive {
	fn eq(&self, other: &Self) -> bool {
		let (left, right) = (self.0.as_bytes(), other.0.as_bytes());

		left.len() == right.len()
			&& left.iter().zip(right).fold(0_u8, |acc, (l, r)| acc | (l ^ r)) == 0
	}
}
impl Eq for Sensitive {}
impl Debug for Sensitive {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("Sensitive").field(&"<redacted>").finish()
	}
}
impl Display for Sensitive {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}
