//! Environment-driven configuration.

// self
use crate::{
	_prelude::*,
	auth::{AuthMount, RoleName, SafetyWindow, SecretPath},
	config::{BrokerConfig, LeasePolicy, RetryPolicy},
	error::ConfigError,
};

/// Variable lookup used for environment-driven configuration; swap it out in tests.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup backed by the process environment.
pub fn process_env() -> EnvLookup {
	Arc::new(|name: &str| std::env::var(name).ok())
}

/// Everything a process needs to log in and keep one dynamic secret alive.
#[derive(Clone, Debug)]
pub struct Settings {
	/// Broker endpoint and login identity.
	pub broker: BrokerConfig,
	/// Secret to read, e.g. `database/creds/my-role`.
	pub secret_path: SecretPath,
	/// Lease renewal policy.
	pub lease: LeasePolicy,
	/// Retry policy for broker calls.
	pub retry: RetryPolicy,
	/// Per-call timeout.
	pub request_timeout: Duration,
	/// STS signing region, when one is configured.
	pub region: Option<String>,
}
impl Settings {
	const DEFAULT_REQUEST_TIMEOUT_SECS: i64 = 10;

	/// Loads settings from the process environment.
	///
	/// | Variable | Default |
	/// | --- | --- |
	/// | `VAULT_ADDR` | required |
	/// | `VAULT_AUTH_MOUNT` | `aws` |
	/// | `VAULT_ROLE` | required |
	/// | `VAULT_AWS_IAM_SERVER_ID` | unset |
	/// | `VAULT_NAMESPACE` | unset |
	/// | `VAULT_SECRET_PATH` | required |
	/// | `VAULT_LEASE_SAFETY_WINDOW` | `0.2`, within `[0, 1]` |
	/// | `VAULT_REQUEST_TIMEOUT_SECS` | `10` |
	/// | `VAULT_MAX_ATTEMPTS` | `3` |
	/// | `AWS_REGION` / `AWS_DEFAULT_REGION` | unset (`us-east-1`) |
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(process_env())
	}

	/// Loads settings through `lookup`.
	pub fn from_lookup(lookup: EnvLookup) -> Result<Self, ConfigError> {
		let var = |name: &str| {
			lookup(name).map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
		};
		let address = var("VAULT_ADDR").ok_or(ConfigError::MissingSetting { name: "VAULT_ADDR" })?;
		let role = var("VAULT_ROLE").ok_or(ConfigError::MissingSetting { name: "VAULT_ROLE" })?;
		let mut broker = BrokerConfig::builder().address(address).role(RoleName::new(role)?);

		if let Some(mount) = var("VAULT_AUTH_MOUNT") {
			broker = broker.auth_mount(AuthMount::new(mount)?);
		}
		if let Some(server_id) = var("VAULT_AWS_IAM_SERVER_ID") {
			broker = broker.server_id(server_id);
		}
		if let Some(namespace) = var("VAULT_NAMESPACE") {
			broker = broker.namespace(namespace);
		}

		let secret_path = var("VAULT_SECRET_PATH")
			.ok_or(ConfigError::MissingSetting { name: "VAULT_SECRET_PATH" })?;
		let mut lease = LeasePolicy::default();

		if let Some(raw) = var("VAULT_LEASE_SAFETY_WINDOW") {
			lease = lease.with_safety_window(SafetyWindow::new(parse(
				"VAULT_LEASE_SAFETY_WINDOW",
				&raw,
			)?)?);
		}

		let mut retry = RetryPolicy::default();

		if let Some(raw) = var("VAULT_MAX_ATTEMPTS") {
			retry.max_attempts = parse::<u32>("VAULT_MAX_ATTEMPTS", &raw)?.max(1);
		}

		let request_timeout = match var("VAULT_REQUEST_TIMEOUT_SECS") {
			Some(raw) => match parse::<u32>("VAULT_REQUEST_TIMEOUT_SECS", &raw)? {
				0 =>
					return Err(ConfigError::InvalidSetting {
						name: "VAULT_REQUEST_TIMEOUT_SECS",
						value: raw,
					}),
				secs => Duration::seconds(i64::from(secs)),
			},
			None => Duration::seconds(Self::DEFAULT_REQUEST_TIMEOUT_SECS),
		};

		Ok(Self {
			broker: broker.build()?,
			secret_path: SecretPath::new(secret_path)?,
			lease,
			retry,
			request_timeout,
			region: var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION")),
		})
	}
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
	T: FromStr,
{
	raw.parse().map_err(|_| ConfigError::InvalidSetting { name, value: raw.to_owned() })
}
