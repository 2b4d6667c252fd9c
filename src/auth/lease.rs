//! Dynamic secret leases and the safety window that decides when to renew them.

// crates.io
use time::PrimitiveDateTime;
// self
use crate::{_prelude::*, auth::SecretPath, error::ConfigError};

/// Fraction of a lease (or token) lifetime, counted from the end, inside which the resource
/// counts as expiring.
///
/// A window of `0.2` on a 3600s lease starts at 2880s. Valid values are `[0, 1]`; `1` treats the
/// resource as expiring from the moment it was obtained.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct SafetyWindow(f64);
impl SafetyWindow {
	/// The final 20% of the lifetime.
	pub const DEFAULT: Self = Self(0.2);

	/// Validates and wraps a fraction.
	pub fn new(fraction: f64) -> Result<Self, ConfigError> {
		if !(0.0..=1.0).contains(&fraction) {
			return Err(ConfigError::InvalidSafetyWindow { value: fraction });
		}

		Ok(Self(fraction))
	}

	/// Raw fraction.
	pub fn fraction(self) -> f64 {
		self.0
	}

	/// Offset from the start of `lifetime` at which the window opens.
	pub fn threshold(self, lifetime: Duration) -> Duration {
		Duration::saturating_seconds_f64(lifetime.as_seconds_f64() * (1.0 - self.0))
	}
}
impl Default for SafetyWindow {
	fn default() -> Self {
		Self::DEFAULT
	}
}
impl TryFrom<f64> for SafetyWindow {
	type Error = ConfigError;

	fn try_from(value: f64) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl From<SafetyWindow> for f64 {
	fn from(value: SafetyWindow) -> Self {
		value.0
	}
}

/// Longest lifetime accepted from the broker for a lease or token.
pub const MAX_LIFETIME: Duration = Duration::days(3650);

/// `instant + offset`, saturating at the latest representable instant.
pub(crate) fn saturating_offset(instant: OffsetDateTime, offset: Duration) -> OffsetDateTime {
	instant.checked_add(offset).unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// Opaque key/value material returned by a secret read. `Debug` lists keys only.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretPayload(BTreeMap<String, serde_json::Value>);
impl SecretPayload {
	/// Wraps a decoded `data` object.
	pub fn new(data: BTreeMap<String, serde_json::Value>) -> Self {
		Self(data)
	}

	/// Raw value for `key`. Callers must avoid logging it.
	pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
		self.0.get(key)
	}

	/// String value for `key`, if present and a JSON string.
	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.get(key).and_then(serde_json::Value::as_str)
	}

	/// Iterator over field names.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	/// Number of fields.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` if the payload has no fields.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl Debug for SecretPayload {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_set().entries(self.keys()).finish()
	}
}

/// Lifecycle status of a [`SecretLease`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseStatus {
	/// `now < obtained_at + duration`.
	Active,
	/// The broker has (or will have) revoked the credential.
	Expired,
}

/// Dynamic secret plus the validity record the broker attached to it.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretLease {
	/// Path the secret was read from.
	pub path: SecretPath,
	/// Secret material.
	pub payload: SecretPayload,
	/// Broker lease identifier, used for renewal and revocation.
	pub lease_id: String,
	/// Lifetime granted by the broker, counted from `obtained_at`.
	pub duration: Duration,
	/// Whether the broker accepts renewals for this lease.
	pub renewable: bool,
	/// Instant the request that produced (or last renewed) this lease was started.
	pub obtained_at: OffsetDateTime,
	/// Identifies the credential material; renewals keep it, fresh reads change it.
	pub generation: u64,
}
impl SecretLease {
	/// Expiry instant.
	pub fn expires_at(&self) -> OffsetDateTime {
		saturating_offset(self.obtained_at, self.duration)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> LeaseStatus {
		if instant < self.expires_at() { LeaseStatus::Active } else { LeaseStatus::Expired }
	}

	/// Returns `true` if the lease can still be handed to consumers.
	pub fn is_active_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), LeaseStatus::Active)
	}

	/// Returns `true` iff `instant >= obtained_at + duration * (1 - window)`.
	pub fn is_expiring_at(&self, window: SafetyWindow, instant: OffsetDateTime) -> bool {
		instant >= saturating_offset(self.obtained_at, window.threshold(self.duration))
	}

	/// Time left before expiry, clamped at zero.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		let remaining = self.expires_at() - instant;

		if remaining.is_negative() { Duration::ZERO } else { remaining }
	}
}
impl Debug for SecretLease {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SecretLease")
			.field("path", &self.path)
			.field("payload", &self.payload)
			.field("lease_id", &self.lease_id)
			.field("duration", &self.duration)
			.field("renewable", &self.renewable)
			.field("obtained_at", &self.obtained_at)
			.field("generation", &self.generation)
			.finish()
	}
}
