//! Demonstrates the full dynamic-credential loop against a mocked broker.
//!
//! 1. Sign an STS `GetCallerIdentity` assertion with static AWS credentials and log in.
//! 2. Read `database/creds/vault_go_demo` through a [`LeaseManager`] and start background renewal.
//! 3. Hand the leased credentials to a [`ConnectionProvisioner`] via [`ProvisionedConnection`].
//!
//! Run with `RUST_LOG=secret_lease_broker=debug` to see the flow spans.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use tracing_subscriber::EnvFilter;
// self
use secret_lease_broker::{
	auth::{RoleName, SecretPath, Sensitive},
	client::ReqwestBrokerClient,
	config::{BrokerConfig, LeasePolicy},
	identity::{AwsCredentials, AwsIamIdentity, StaticCredentialSource},
	lease::ReqwestLeaseManager,
	provision::{
		ConnectionProvisioner, ConnectionTarget, DatabaseCredentials, ProvisionFuture,
		ProvisionedConnection,
	},
};

/// Stand-in for a database driver; remembers who it connected as.
struct PrintingProvisioner;
impl ConnectionProvisioner for PrintingProvisioner {
	type Connection = String;

	fn connect<'a>(
		&'a self,
		target: &'a ConnectionTarget,
		credentials: &'a DatabaseCredentials,
	) -> ProvisionFuture<'a, Self::Connection> {
		Box::pin(async move {
			// A real driver would consume the DSN here.
			let _dsn = target.dsn(credentials)?;

			println!(
				"Connected to {target} as {} (lease generation {}).",
				credentials.username, credentials.generation
			);

			Ok(credentials.username.clone())
		})
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

	let server = MockServer::start_async().await;
	let login_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/auth/aws/login").header("x-vault-request", "true");
			then.status(200).header("content-type", "application/json").body(
				r#"{"auth":{"client_token":"s.demo","accessor":"acc-demo","lease_duration":2764800,"renewable":true,"policies":["db-read"]}}"#,
			);
		})
		.await;
	let read_mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/v1/database/creds/vault_go_demo")
				.header("x-vault-token", "s.demo");
			then.status(200).header("content-type", "application/json").body(
				r#"{"lease_id":"database/creds/vault_go_demo/7Kq","lease_duration":3600,"renewable":true,"data":{"username":"v-aws-my-role-i-7Kq","password":"A1a-demo-password"}}"#,
			);
		})
		.await;
	let config = BrokerConfig::builder()
		.address(server.base_url())
		.role(RoleName::new("my-role-iam")?)
		.server_id("vault.example.com")
		.build()?;
	let identity = AwsIamIdentity::new(Arc::new(StaticCredentialSource(AwsCredentials {
		access_key_id: "AKIDEXAMPLE".into(),
		secret_access_key: Sensitive::new("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
		session_token: None,
	})))?;
	let client = Arc::new(ReqwestBrokerClient::new(config, Arc::new(identity)));
	let token = client.login().await?;

	println!(
		"Logged in; token is renewable: {}, policies: {:?}.",
		token.renewable, token.policies
	);

	let leases = Arc::new(ReqwestLeaseManager::new(client, LeasePolicy::default()));
	let renewal = leases.spawn_renewal();
	let connection = ProvisionedConnection::new(
		leases.clone(),
		SecretPath::new("database/creds/vault_go_demo")?,
		ConnectionTarget::postgres("localhost", 5432, "vault_go_demo")
			.with_param("sslmode", "disable"),
		Arc::new(PrintingProvisioner),
	);
	let first = connection.connection().await?;
	let again = connection.connection().await?;

	println!("Reused connection for {again}: {}.", Arc::ptr_eq(&first, &again));
	println!("Lease fetches so far: {}.", leases.metrics().fetches());

	renewal.abort();
	login_mock.assert_async().await;
	read_mock.assert_async().await;

	Ok(())
}
