//! Builder for [`BrokerConfig`].

// self
use crate::{
	_prelude::*,
	auth::{AuthMount, RoleName},
	config::BrokerConfig,
	error::ConfigError,
};

/// Builder for [`BrokerConfig`] values.
#[derive(Clone, Debug, Default)]
pub struct BrokerConfigBuilder {
	/// Raw broker address, parsed on [`build`](Self::build).
	pub address: Option<String>,
	/// Auth mount; `aws` when unset.
	pub auth_mount: Option<AuthMount>,
	/// Role requested at login.
	pub role: Option<RoleName>,
	/// Server-id header value.
	pub server_id: Option<String>,
	/// Broker namespace.
	pub namespace: Option<String>,
}
impl BrokerConfigBuilder {
	/// Mount used when none is configured.
	pub const DEFAULT_AUTH_MOUNT: &'static str = "aws";

	/// Sets the broker address, e.g. `http://127.0.0.1:8200`.
	pub fn address(mut self, address: impl AsRef<str>) -> Self {
		self.address = Some(address.as_ref().to_owned());

		self
	}

	/// Sets the auth mount.
	pub fn auth_mount(mut self, mount: AuthMount) -> Self {
		self.auth_mount = Some(mount);

		self
	}

	/// Sets the login role.
	pub fn role(mut self, role: RoleName) -> Self {
		self.role = Some(role);

		self
	}

	/// Sets the server-id header value; empty strings clear it.
	pub fn server_id(mut self, server_id: impl Into<String>) -> Self {
		self.server_id = Some(server_id.into()).filter(|value| !value.is_empty());

		self
	}

	/// Sets the namespace; empty strings clear it.
	pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Some(namespace.into()).filter(|value| !value.is_empty());

		self
	}

	/// Consumes the builder and validates the resulting config.
	pub fn build(self) -> Result<BrokerConfig, ConfigError> {
		let raw = self.address.ok_or(ConfigError::MissingSetting { name: "address" })?;
		let address =
			Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidAddress { source })?;

		if address.cannot_be_a_base() || !matches!(address.scheme(), "http" | "https") {
			return Err(ConfigError::AddressNotABase { address: raw });
		}

		let role = self.role.ok_or(ConfigError::MissingSetting { name: "role" })?;
		let auth_mount = match self.auth_mount {
			Some(mount) => mount,
			None => AuthMount::new(Self::DEFAULT_AUTH_MOUNT)?,
		};

		Ok(BrokerConfig {
			address,
			auth_mount,
			role,
			server_id: self.server_id,
			namespace: self.namespace,
		})
	}
}
