//! Strongly typed identifiers for broker mounts, roles, and secret paths.
//!
//! Mounts and secret paths are relative broker paths (`aws`, `database/creds/app`): no leading or
//! trailing `/`, no empty, `.` or `..` segments. Roles are single names.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $kind:literal, $check:path, $doc:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates `value` and wraps it.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				Self::try_from(value.into())
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_common($kind, &value)?;
				$check($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.debug_tuple($kind).field(&self.0).finish()
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 256;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (auth mount, role, secret path).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed byte length.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// Kind of identifier.
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
	/// The identifier contains a character the broker does not accept here.
	#[error("{kind} identifier contains the disallowed character {character:?}.")]
	InvalidCharacter {
		/// Kind of identifier.
		kind: &'static str,
		/// First offending character.
		character: char,
	},
	/// A path identifier has a leading or trailing `/`, or an empty, `.` or `..` segment.
	#[error("{kind} identifier must be a relative path without empty, `.` or `..` segments.")]
	InvalidSegment {
		/// Kind of identifier.
		kind: &'static str,
	},
}

def_id!(
	AuthMount,
	"AuthMount",
	validate_path,
	"Mount path of the broker auth method (the identity provider name, e.g. `aws`)."
);
def_id!(RoleName, "Role", validate_role, "Broker role the identity logs in as.");
def_id!(
	SecretPath,
	"SecretPath",
	validate_path,
	"Broker path of a dynamic secret, e.g. `database/creds/app`."
);
impl SecretPath {
	/// Path segments, mount first.
	pub fn segments(&self) -> impl Iterator<Item = &str> {
		self.0.split('/')
	}
}

fn validate_common(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}
	if let Some(character) = view.chars().find(|c| c.is_whitespace() || c.is_control()) {
		return Err(IdentifierError::InvalidCharacter { kind, character });
	}

	Ok(())
}

fn validate_path(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.split('/').any(|segment| matches!(segment, "" | "." | "..")) {
		return Err(IdentifierError::InvalidSegment { kind });
	}
	if let Some(character) = view.chars().find(|c| matches!(c, '?' | '#' | '%')) {
		return Err(IdentifierError::InvalidCharacter { kind, character });
	}

	Ok(())
}

fn validate_role(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	match view.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@')))
	{
		Some(character) => Err(IdentifierError::InvalidCharacter { kind, character }),
		None => Ok(()),
	}
}
