//! Broker endpoint configuration, lease and retry policies, and environment loading.

pub mod builder;

mod env;

pub use builder::*;
pub use env::*;

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	auth::{AuthMount, RoleName, SafetyWindow},
	error::ConfigError,
};

/// Where and as whom to log in. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
	address: Url,
	auth_mount: AuthMount,
	role: RoleName,
	server_id: Option<String>,
	namespace: Option<String>,
}
impl BrokerConfig {
	/// Starts a validating builder.
	pub fn builder() -> BrokerConfigBuilder {
		BrokerConfigBuilder::default()
	}

	/// Broker base address.
	pub fn address(&self) -> &Url {
		&self.address
	}

	/// Auth method mount, e.g. `aws`.
	pub fn auth_mount(&self) -> &AuthMount {
		&self.auth_mount
	}

	/// Role requested at login.
	pub fn role(&self) -> &RoleName {
		&self.role
	}

	/// Value bound into the assertion's server-id header.
	pub fn server_id(&self) -> Option<&str> {
		self.server_id.as_deref()
	}

	/// Namespace sent as `X-Vault-Namespace`.
	pub fn namespace(&self) -> Option<&str> {
		self.namespace.as_deref()
	}

	/// API path of the login endpoint, relative to `/v1/`.
	pub fn login_path(&self) -> String {
		format!("auth/{}/login", self.auth_mount)
	}

	/// Resolves an API path (relative to `/v1/`) against the broker address.
	pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
		let mut url = self.address.clone();

		url.path_segments_mut()
			.map_err(|_| ConfigError::AddressNotABase { address: self.address.to_string() })?
			.pop_if_empty()
			.push("v1")
			.extend(path.split('/').filter(|segment| !segment.is_empty()));

		Ok(url)
	}
}

/// How leases are kept alive.
#[derive(Clone, Debug, PartialEq)]
pub struct LeasePolicy {
	/// Final fraction of a lease lifetime inside which it is renewed.
	pub safety_window: SafetyWindow,
	/// Extension requested on renewal; the broker decides when unset.
	pub renew_increment: Option<Duration>,
	/// Revoke a lease (best effort) once a fresh read supersedes it.
	pub revoke_superseded: bool,
	/// Period of the background renewal task.
	pub renewal_interval: Duration,
}
impl LeasePolicy {
	const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::seconds(30);

	/// Overrides the safety window.
	pub fn with_safety_window(mut self, window: SafetyWindow) -> Self {
		self.safety_window = window;

		self
	}

	/// Requests a specific extension on each renewal.
	pub fn with_renew_increment(mut self, increment: Duration) -> Self {
		self.renew_increment = if increment.is_positive() { Some(increment) } else { None };

		self
	}

	/// Enables or disables revoking superseded leases.
	pub fn with_revoke_superseded(mut self, revoke: bool) -> Self {
		self.revoke_superseded = revoke;

		self
	}

	/// Overrides the background renewal period (clamped to at least one second).
	pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
		self.renewal_interval = interval.max(Duration::SECOND);

		self
	}
}
impl Default for LeasePolicy {
	fn default() -> Self {
		Self {
			safety_window: SafetyWindow::DEFAULT,
			renew_increment: None,
			revoke_superseded: false,
			renewal_interval: Self::DEFAULT_RENEWAL_INTERVAL,
		}
	}
}

/// Exponential backoff with jitter for retryable broker failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, first try included.
	pub max_attempts: u32,
	/// Delay before the second attempt.
	pub base_delay: Duration,
	/// Upper bound on any single delay, `Retry-After` included.
	pub max_delay: Duration,
}
impl RetryPolicy {
	/// Retries up to `max_attempts` times with no delay.
	pub fn immediate(max_attempts: u32) -> Self {
		Self {
			max_attempts: max_attempts.max(1),
			base_delay: Duration::ZERO,
			max_delay: Duration::ZERO,
		}
	}

	/// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
	///
	/// A `Retry-After` hint replaces the computed backoff; both are capped at `max_delay`.
	pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
		let delay = match retry_after {
			Some(hint) => hint,
			None => {
				let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
				let backoff = self.base_delay.as_seconds_f64() * 2_f64.powi(exponent);
				let jitter = rand::rng().random_range(0.5..1.5);

				Duration::seconds_f64((backoff * jitter).min(self.max_delay.as_seconds_f64()))
			},
		};

		delay.clamp(Duration::ZERO, self.max_delay)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::milliseconds(200),
			max_delay: Duration::seconds(5),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn config(address: &str) -> BrokerConfig {
		BrokerConfig::builder()
			.address(address)
			.role(RoleName::new("my-role-iam").expect("Role fixture should be valid."))
			.build()
			.expect("Config fixture should build.")
	}

	#[test]
	fn endpoint_joins_under_v1() {
		let local = config("http://127.0.0.1:8200");

		assert_eq!(local.login_path(), "auth/aws/login");
		assert_eq!(
			local.endpoint(&local.login_path()).map(String::from).ok().as_deref(),
			Some("http://127.0.0.1:8200/v1/auth/aws/login")
		);
		assert_eq!(
			config("https://vault.example.com/prefix/")
				.endpoint("/database/creds/app")
				.map(String::from)
				.ok()
				.as_deref(),
			Some("https://vault.example.com/prefix/v1/database/creds/app")
		);
	}

	#[test]
	fn backoff_grows_and_is_capped() {
		let policy = RetryPolicy::default();

		for _ in 0..32 {
			let first = policy.delay_for(1, None);
			let third = policy.delay_for(3, None);

			assert!(first >= Duration::milliseconds(100) && first <= Duration::milliseconds(300));
			assert!(third >= Duration::milliseconds(400) && third <= Duration::milliseconds(1200));
			assert!(policy.delay_for(30, None) <= policy.max_delay);
		}
	}

	#[test]
	fn retry_after_overrides_backoff_within_cap() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.delay_for(1, Some(Duration::seconds(2))), Duration::seconds(2));
		assert_eq!(policy.delay_for(1, Some(Duration::minutes(10))), Duration::seconds(5));
		assert_eq!(RetryPolicy::immediate(3).delay_for(2, None), Duration::ZERO);
	}

	#[test]
	fn lease_policy_defaults() {
		let policy = LeasePolicy::default();

		assert_eq!(policy.safety_window.fraction(), 0.2);
		assert!(!policy.revoke_superseded);
		assert_eq!(policy.renewal_interval, Duration::seconds(30));
		assert_eq!(policy.with_renew_increment(Duration::ZERO).renew_increment, None);
	}
}
