//! Cloud-identity login to a secret broker with dynamic credential leases that renew
//! themselves: SigV4-signed IAM assertions, single-flight token state, and lease-aware
//! connection provisioning in one crate.
//!
//! The flow runs leaf-first:
//!
//! 1. [`identity::AwsIamIdentity`] signs an STS `GetCallerIdentity` request with ambient AWS
//!    credentials.
//! 2. [`client::BrokerClient`] exchanges that assertion for a broker access token and keeps it
//!    fresh.
//! 3. [`lease::LeaseManager`] reads dynamic secrets with the token and renews or replaces their
//!    leases before consumers observe expiry.
//! 4. [`provision::ProvisionedConnection`] hands the current credentials to a caller-supplied
//!    [`provision::ConnectionProvisioner`] and reconnects when they change.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod api;
pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod lease;
pub mod obs;
pub mod provision;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		api::ReqwestTransportErrorMapper,
		auth::{RoleName, Sensitive},
		client::BrokerClient,
		clock::{Clock, ManualClock},
		config::{BrokerConfig, LeasePolicy, RetryPolicy},
		http::ReqwestHttpClient,
		identity::{AwsCredentials, AwsIamIdentity, StaticCredentialSource},
		lease::LeaseManager,
	};

	/// Client type alias used by reqwest-backed integration tests.
	pub type ReqwestTestClient = BrokerClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;
	/// Lease manager type alias used by reqwest-backed integration tests.
	pub type ReqwestTestLeases = LeaseManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Role every test client logs in as.
	pub const TEST_ROLE: &str = "my-role-iam";
	/// Server-id header value bound into test assertions.
	pub const TEST_SERVER_ID: &str = "vault.example.com";

	/// Fixed AWS credentials used to sign test assertions.
	pub fn test_credentials() -> AwsCredentials {
		AwsCredentials {
			access_key_id: "AKIDEXAMPLE".into(),
			secret_access_key: Sensitive::new("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
			session_token: None,
		}
	}

	/// Builds the reqwest HTTP client used against plain-HTTP `httpmock` servers.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		ReqwestHttpClient::default()
	}

	/// Builds a [`BrokerConfig`] pointing at `address` with the test role and server id.
	pub fn test_broker_config(address: &str) -> BrokerConfig {
		BrokerConfig::builder()
			.address(address)
			.role(RoleName::new(TEST_ROLE).expect("Test role should be valid."))
			.server_id(TEST_SERVER_ID)
			.build()
			.expect("Test broker config should build.")
	}

	/// Constructs a reqwest-backed [`BrokerClient`] whose identity and lifecycle checks share
	/// `clock`, with immediate retries so tests never sleep.
	pub fn build_reqwest_test_client(address: &str, clock: &ManualClock) -> ReqwestTestClient {
		let clock: Arc<dyn Clock> = Arc::new(clock.clone());
		let identity = AwsIamIdentity::new(Arc::new(StaticCredentialSource(test_credentials())))
			.expect("Test identity should build.")
			.with_clock(clock.clone());

		ReqwestTestClient::with_http_client(
			test_broker_config(address),
			Arc::new(identity),
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		)
		.with_clock(clock)
		.with_retry_policy(RetryPolicy::immediate(3))
	}

	/// Constructs a [`LeaseManager`] on top of [`build_reqwest_test_client`].
	pub fn build_reqwest_test_leases(
		address: &str,
		clock: &ManualClock,
		policy: LeasePolicy,
	) -> Arc<ReqwestTestLeases> {
		Arc::new(LeaseManager::new(Arc::new(build_reqwest_test_client(address, clock)), policy))
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _, tracing_subscriber as _};
