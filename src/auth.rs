//! Broker-domain identifiers, redacted secrets, access tokens, and secret leases.

pub mod id;
pub mod lease;
pub mod secret;
pub mod token;

pub use id::*;
pub use lease::*;
pub use secret::*;
pub use token::*;
