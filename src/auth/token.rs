//! Broker access token model, lifecycle helpers, and builder.

// self
use crate::{
	_prelude::*,
	auth::{MAX_LIFETIME, SafetyWindow, Sensitive, lease},
};

/// Lifecycle status of an [`AccessToken`] at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is usable.
	Active,
	/// Token outlived its TTL.
	Expired,
}

/// Errors produced by [`AccessTokenBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum AccessTokenBuilderError {
	/// Issued when no token value was provided.
	#[error("Client token is required.")]
	MissingToken,
	/// Issued when the TTL is negative.
	#[error("Token TTL cannot be negative.")]
	NegativeTtl,
	/// Issued when the TTL exceeds [`MAX_LIFETIME`].
	#[error("Token TTL exceeds {max_secs} seconds.")]
	TtlTooLong {
		/// Longest accepted TTL in seconds.
		max_secs: i64,
	},
}

/// Broker-issued access token.
///
/// Tokens are replaced wholesale on every login or renewal; nothing edits one in place.
/// Ordering between tokens uses `(issued_at, sequence)` so a slower exchange never
/// overwrites a newer token.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessToken {
	/// Token value sent as `X-Vault-Token`; callers must avoid logging it.
	pub token: Sensitive,
	/// Token accessor, safe to log.
	pub accessor: Option<String>,
	/// Instant the exchange that produced this token was started.
	pub issued_at: OffsetDateTime,
	/// Time to live reported by the broker; `None` means the token does not expire.
	pub ttl: Option<Duration>,
	/// Whether the broker allows `renew-self` on this token.
	pub renewable: bool,
	/// Policies attached to the token.
	pub policies: Vec<String>,
	/// Process-local tie breaker for tokens issued at the same instant.
	pub sequence: u64,
}
impl AccessToken {
	/// Returns a builder.
	pub fn builder(token: impl Into<String>) -> AccessTokenBuilder {
		AccessTokenBuilder::new(token)
	}

	/// Expiry instant, when the token has a TTL.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.ttl.map(|ttl| lease::saturating_offset(self.issued_at, ttl))
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		match self.expires_at() {
			Some(expires_at) if instant >= expires_at => TokenStatus::Expired,
			_ => TokenStatus::Active,
		}
	}

	/// Returns `true` if the token is usable at the provided instant.
	pub fn is_active_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Active)
	}

	/// Returns `true` once the token has entered the final `window` fraction of its TTL.
	///
	/// Tokens without a TTL never expire and therefore never enter the window.
	pub fn is_expiring_at(&self, window: SafetyWindow, instant: OffsetDateTime) -> bool {
		match self.ttl {
			Some(ttl) =>
				instant >= lease::saturating_offset(self.issued_at, window.threshold(ttl)),
			None => false,
		}
	}

	/// Returns `true` when `self` was issued strictly after `other`.
	pub fn supersedes(&self, other: &AccessToken) -> bool {
		(self.issued_at, self.sequence) > (other.issued_at, other.sequence)
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("token", &"<redacted>")
			.field("accessor", &self.accessor)
			.field("issued_at", &self.issued_at)
			.field("ttl", &self.ttl)
			.field("renewable", &self.renewable)
			.field("policies", &self.policies)
			.field("sequence", &self.sequence)
			.finish()
	}
}

/// Builder for [`AccessToken`].
#[derive(Clone, Debug)]
pub struct AccessTokenBuilder {
	token: Sensitive,
	accessor: Option<String>,
	issued_at: Option<OffsetDateTime>,
	ttl: Option<Duration>,
	renewable: bool,
	policies: Vec<String>,
	sequence: u64,
}
impl AccessTokenBuilder {
	fn new(token: impl Into<String>) -> Self {
		Self {
			token: Sensitive::new(token),
			accessor: None,
			issued_at: None,
			ttl: None,
			renewable: false,
			policies: Vec::new(),
			sequence: 0,
		}
	}

	/// Sets the token accessor.
	pub fn accessor(mut self, accessor: impl Into<String>) -> Self {
		self.accessor = Some(accessor.into());

		self
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets the TTL from the broker's `lease_duration` seconds; `0` means no TTL.
	pub fn lease_duration_secs(mut self, secs: u64) -> Self {
		self.ttl = match secs {
			0 => None,
			secs => Some(Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))),
		};

		self
	}

	/// Sets the TTL directly.
	pub fn ttl(mut self, ttl: Duration) -> Self {
		self.ttl = Some(ttl);

		self
	}

	/// Sets the renewable flag.
	pub fn renewable(mut self, renewable: bool) -> Self {
		self.renewable = renewable;

		self
	}

	/// Sets the attached policies.
	pub fn policies(mut self, policies: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.policies = policies.into_iter().map(Into::into).collect();

		self
	}

	/// Sets the process-local sequence number.
	pub fn sequence(mut self, sequence: u64) -> Self {
		self.sequence = sequence;

		self
	}

	/// Consumes the builder and produces an [`AccessToken`].
	pub fn build(self) -> Result<AccessToken, AccessTokenBuilderError> {
		if self.token.expose().is_empty() {
			return Err(AccessTokenBuilderError::MissingToken);
		}
		if self.ttl.is_some_and(|ttl| ttl.is_negative()) {
			return Err(AccessTokenBuilderError::NegativeTtl);
		}
		if self.ttl.is_some_and(|ttl| ttl > MAX_LIFETIME) {
			return Err(AccessTokenBuilderError::TtlTooLong {
				max_secs: MAX_LIFETIME.whole_seconds(),
			});
		}

		Ok(AccessToken {
			token: self.token,
			accessor: self.accessor,
			issued_at: self.issued_at.unwrap_or_else(OffsetDateTime::now_utc),
			ttl: self.ttl,
			renewable: self.renewable,
			policies: self.policies,
			sequence: self.sequence,
		})
	}
}
