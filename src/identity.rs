//! Identity assertion builder.
//!
//! An [`IdentityProvider`] turns ambient cloud credentials into a signed
//! [`IdentityAssertion`]: a complete HTTP request the broker can replay against the cloud
//! provider to learn who signed it. The bundled [`AwsIamIdentity`] signs an STS
//! `GetCallerIdentity` call with SigV4; [`sigv4::verify`] recomputes that signature.
//!
//! Assertions are built fresh for every login attempt and are never cached.

pub mod assertion;
pub mod aws;
pub mod credentials;
pub mod sigv4;

pub use assertion::*;
pub use aws::*;
pub use credentials::*;

// self
use crate::_prelude::*;

/// Header name to ordered values.
pub type HeaderSet = BTreeMap<String, Vec<String>>;

/// Produces signed identity assertions for a particular cloud provider.
pub trait IdentityProvider
where
	Self: Send + Sync,
{
	/// Signs a new assertion, binding `server_id` into it when present and non-empty.
	///
	/// Fails with [`Error::NoAmbientCredentials`] or [`Error::SigningFailed`]; neither is
	/// retried automatically.
	fn build(&self, server_id: Option<&str>) -> Result<IdentityAssertion>;
}
