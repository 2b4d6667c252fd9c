#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use time::macros;
// self
use secret_lease_broker::{
	_preludet::*,
	auth::{SecretLease, SecretPath},
	clock::{Clock, ManualClock},
	config::LeasePolicy,
	lease::{LeaseEvent, RenewalReport},
};

const LOGIN_PATH: &str = "/v1/auth/aws/login";
const READ_PATH: &str = "/v1/database/creds/app";
const RENEW_PATH: &str = "/v1/sys/leases/renew";
const REVOKE_PATH: &str = "/v1/sys/leases/revoke";
const LEASE_ID: &str = "database/creds/app/abc123";

fn clock() -> ManualClock {
	ManualClock::new(macros::datetime!(2025-01-01 00:00 UTC))
}

fn path() -> SecretPath {
	SecretPath::new("database/creds/app").expect("Secret path fixture should be valid.")
}

fn auth_body(token: &str) -> String {
	format!(
		r#"{{"auth":{{"client_token":"{token}","accessor":"acc","lease_duration":2764800,"renewable":true,"policies":["db-read"]}}}}"#
	)
}

fn secret_body(lease_id: &str, duration: i64, renewable: bool) -> String {
	format!(
		r#"{{"request_id":"r-1","lease_id":"{lease_id}","lease_duration":{duration},"renewable":{renewable},"data":{{"username":"v-aws-app-1","password":"A1a-secret"}}}}"#
	)
}

async fn mock_login<'a>(server: &'a MockServer, token: &str) -> httpmock::Mock<'a> {
	let body = auth_body(token);

	server
		.mock_async(|when, then| {
			when.method(POST).path(LOGIN_PATH);
			then.status(200).header("content-type", "application/json").body(body);
		})
		.await
}

async fn mock_read<'a>(server: &'a MockServer, body: String) -> httpmock::Mock<'a> {
	server
		.mock_async(|when, then| {
			when.method(GET).path(READ_PATH).header("x-vault-token", "s.lease");
			then.status(200).header("content-type", "application/json").body(body);
		})
		.await
}

async fn mock_renew<'a>(server: &'a MockServer, status: u16, body: String) -> httpmock::Mock<'a> {
	server
		.mock_async(|when, then| {
			when.method(PUT)
				.path(RENEW_PATH)
				.header("x-vault-token", "s.lease")
				.header("content-type", "application/json");
			then.status(status).header("content-type", "application/json").body(body);
		})
		.await
}

fn assert_same_material(left: &SecretLease, right: &SecretLease) {
	assert_eq!(left.lease_id, right.lease_id);
	assert_eq!(left.generation, right.generation);
	assert_eq!(left.payload, right.payload);
}

#[tokio::test]
async fn fetch_reads_secret_with_access_token() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let mut events = leases.subscribe();
	let login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let lease = leases.fetch(&path()).await.expect("Secret read should succeed.");

	login.assert_calls_async(1).await;
	read.assert_calls_async(1).await;

	assert_eq!(lease.lease_id, LEASE_ID);
	assert_eq!(lease.duration, Duration::hours(1));
	assert_eq!(lease.obtained_at, clock.now());
	assert_eq!(lease.generation, 1);
	assert_eq!(lease.payload.get_str("username"), Some("v-aws-app-1"));
	assert!(!format!("{lease:?}").contains("A1a-secret"));

	match events.try_recv().expect("A replacement event should be broadcast.") {
		LeaseEvent::Replaced(replaced) => assert_same_material(&replaced, &lease),
		other => panic!("Expected a replacement event, got {other:?}."),
	}

	let current = leases.current(&path()).expect("The read should be installed.");

	assert_same_material(&current, &lease);
	assert_eq!(leases.metrics().fetches(), 1);
}

#[tokio::test]
async fn non_positive_lease_duration_is_malformed() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let _read = mock_read(&server, secret_body(LEASE_ID, 0, true)).await;

	assert!(matches!(leases.fetch(&path()).await, Err(Error::MalformedResponse { .. })));
	assert!(leases.current(&path()).is_none());
	assert_eq!(leases.metrics().fetch_failures(), 1);
}

#[tokio::test]
async fn unrepresentable_lease_duration_is_malformed() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, i64::MAX, true)).await;

	assert!(matches!(leases.fetch(&path()).await, Err(Error::MalformedResponse { .. })));
	assert!(matches!(leases.lease(&path()).await, Err(Error::MalformedResponse { .. })));
	assert!(leases.current(&path()).is_none());
	assert_eq!(leases.run_renewal_pass().await, RenewalReport::default());

	read.assert_calls_async(2).await;
}

#[tokio::test]
async fn renewal_pass_renews_lease_inside_safety_window() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let renew = mock_renew(
		&server,
		200,
		format!(r#"{{"lease_id":"{LEASE_ID}","lease_duration":3600,"renewable":true}}"#),
	)
	.await;
	let original = leases.lease(&path()).await.expect("First lease call should read.");

	clock.advance(Duration::seconds(2000));

	assert!(!leases.is_expiring(&original, leases.policy().safety_window));
	assert_eq!(leases.run_renewal_pass().await, RenewalReport::default());

	clock.advance(Duration::seconds(1000));

	assert!(leases.is_expiring(&original, leases.policy().safety_window));
	assert_eq!(leases.run_renewal_pass().await, RenewalReport { renewed: 1, ..Default::default() });

	renew.assert_calls_async(1).await;
	read.assert_calls_async(1).await;

	let renewed = leases.current(&path()).expect("Renewed lease should be installed.");

	assert_same_material(&renewed, &original);
	assert_eq!(renewed.obtained_at, clock.now());
	assert_eq!(renewed.expires_at(), clock.now() + Duration::hours(1));
	assert_eq!(leases.metrics().renewals(), 1);
}

#[tokio::test]
async fn expired_lease_is_replaced_by_a_new_read() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let mut events = leases.subscribe();
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let renew = mock_renew(&server, 200, String::new()).await;
	let original = leases.lease(&path()).await.expect("First lease call should read.");

	clock.advance(Duration::seconds(3700));

	assert!(leases.current(&path()).is_none());

	let replacement = leases.lease(&path()).await.expect("Expired lease should be replaced.");

	read.assert_calls_async(2).await;
	renew.assert_calls_async(0).await;

	assert_eq!(original.generation, 1);
	assert_eq!(replacement.generation, 2);
	assert_eq!(replacement.obtained_at, clock.now());

	let kinds = std::iter::from_fn(|| events.try_recv().ok())
		.map(|event| match event {
			LeaseEvent::Replaced(_) => "replaced",
			LeaseEvent::Renewed(_) => "renewed",
			LeaseEvent::Revoked { .. } => "revoked",
			LeaseEvent::Expired { .. } => "expired",
		})
		.collect::<Vec<_>>();

	assert_eq!(kinds, ["replaced", "expired", "replaced"]);
	assert_eq!(leases.metrics().expirations(), 1);
}

#[tokio::test]
async fn renew_rejects_non_renewable_lease_without_network() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let _read = mock_read(&server, secret_body(LEASE_ID, 3600, false)).await;
	let renew = mock_renew(&server, 200, String::new()).await;
	let lease = leases.fetch(&path()).await.expect("Secret read should succeed.");

	assert!(matches!(leases.renew(&lease).await, Err(Error::NotRenewable { .. })));

	renew.assert_calls_async(0).await;
}

#[tokio::test]
async fn renewal_pass_refetches_non_renewable_lease() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, false)).await;
	let renew = mock_renew(&server, 200, String::new()).await;

	leases.fetch(&path()).await.expect("Secret read should succeed.");
	clock.advance(Duration::seconds(3000));

	assert_eq!(
		leases.run_renewal_pass().await,
		RenewalReport { refetched: 1, ..Default::default() }
	);

	read.assert_calls_async(2).await;
	renew.assert_calls_async(0).await;

	assert_eq!(leases.current(&path()).map(|lease| lease.generation), Some(2));
}

#[tokio::test]
async fn failed_renewal_keeps_serving_active_lease() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let renew = mock_renew(&server, 503, r#"{"errors":["sealed"]}"#.into()).await;
	let original = leases.lease(&path()).await.expect("First lease call should read.");

	clock.advance(Duration::seconds(3000));

	let served = leases.lease(&path()).await.expect("Active lease should still be served.");

	assert_same_material(&served, &original);
	assert_eq!(served.obtained_at, original.obtained_at);

	renew.assert_calls_async(3).await;
	read.assert_calls_async(1).await;

	assert_eq!(leases.metrics().renewal_failures(), 1);
}

#[tokio::test]
async fn unrepresentable_renewal_duration_keeps_serving_active_lease() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let renew = mock_renew(
		&server,
		200,
		format!(r#"{{"lease_id":"{LEASE_ID}","lease_duration":{},"renewable":true}}"#, i64::MAX),
	)
	.await;
	let original = leases.lease(&path()).await.expect("First lease call should read.");

	clock.advance(Duration::seconds(3000));

	assert!(matches!(leases.renew(&original).await, Err(Error::MalformedResponse { .. })));

	let served = leases.lease(&path()).await.expect("Active lease should still be served.");

	assert_same_material(&served, &original);
	assert_eq!(served.expires_at(), original.expires_at());
	assert_eq!(leases.run_renewal_pass().await, RenewalReport { failed: 1, ..Default::default() });

	renew.assert_calls_async(3).await;
	read.assert_calls_async(1).await;
}

#[tokio::test]
async fn capped_renewal_pass_reads_a_fresh_lease() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let renew = mock_renew(
		&server,
		200,
		format!(r#"{{"lease_id":"{LEASE_ID}","lease_duration":20,"renewable":true}}"#),
	)
	.await;

	leases.fetch(&path()).await.expect("Secret read should succeed.");
	clock.advance(Duration::seconds(3000));

	assert_eq!(
		leases.run_renewal_pass().await,
		RenewalReport { refetched: 1, ..Default::default() }
	);

	renew.assert_calls_async(1).await;
	read.assert_calls_async(2).await;

	let current = leases.current(&path()).expect("The fresh read should be installed.");

	assert_eq!(current.generation, 2);
	assert_eq!(current.duration, Duration::hours(1));
	assert_eq!(current.obtained_at, clock.now());
	assert_eq!(leases.metrics().renewals(), 1);
	assert_eq!(leases.metrics().fetches(), 2);
}

#[tokio::test]
async fn capped_renewal_on_demand_serves_a_fresh_lease() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let renew = mock_renew(
		&server,
		200,
		format!(r#"{{"lease_id":"{LEASE_ID}","lease_duration":20,"renewable":true}}"#),
	)
	.await;

	leases.lease(&path()).await.expect("First lease call should read.");
	clock.advance(Duration::seconds(3000));

	let served = leases.lease(&path()).await.expect("A fresh lease should be served.");

	assert_eq!(served.generation, 2);
	assert_eq!(served.expires_at(), clock.now() + Duration::hours(1));

	renew.assert_calls_async(1).await;
	read.assert_calls_async(2).await;
}

#[tokio::test]
async fn renewal_that_outlasts_the_next_pass_is_kept() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let renew = mock_renew(
		&server,
		200,
		format!(r#"{{"lease_id":"{LEASE_ID}","lease_duration":600,"renewable":true}}"#),
	)
	.await;

	leases.fetch(&path()).await.expect("Secret read should succeed.");
	clock.advance(Duration::seconds(3000));

	assert_eq!(leases.run_renewal_pass().await, RenewalReport { renewed: 1, ..Default::default() });

	renew.assert_calls_async(1).await;
	read.assert_calls_async(1).await;

	assert_eq!(leases.current(&path()).map(|lease| lease.duration), Some(Duration::minutes(10)));
}

#[tokio::test]
async fn expired_lease_without_replacement_reports_lease_expired() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;

	leases.lease(&path()).await.expect("First lease call should read.");
	read.delete_async().await;

	let denied = server
		.mock_async(|when, then| {
			when.method(GET).path(READ_PATH);
			then.status(400).body(r#"{"errors":["role not found"]}"#);
		})
		.await;

	clock.advance(Duration::seconds(3700));

	match leases.lease(&path()).await {
		Err(Error::LeaseExpired { path, source: Some(source) }) => {
			assert_eq!(path, "database/creds/app");
			assert!(matches!(*source, Error::BrokerRejected { status: 400, .. }));
		},
		other => panic!("Expected an expired lease error, got {other:?}."),
	}

	denied.assert_calls_async(1).await;

	assert!(leases.current(&path()).is_none());
}

#[tokio::test]
async fn forbidden_read_triggers_one_relogin() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let first_login = mock_login(&server, "s.stale").await;

	leases.client().login().await.expect("First login should succeed.");
	first_login.delete_async().await;

	let second_login = mock_login(&server, "s.lease").await;
	let forbidden = server
		.mock_async(|when, then| {
			when.method(GET).path(READ_PATH).header("x-vault-token", "s.stale");
			then.status(403).body(r#"{"errors":["permission denied"]}"#);
		})
		.await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let lease = leases.fetch(&path()).await.expect("Read should succeed after re-login.");

	assert_eq!(lease.lease_id, LEASE_ID);

	forbidden.assert_calls_async(1).await;
	second_login.assert_calls_async(1).await;
	read.assert_calls_async(1).await;

	assert_eq!(
		leases.client().current_token().map(|token| token.token.expose().to_owned()).as_deref(),
		Some("s.lease")
	);
}

#[tokio::test]
async fn concurrent_lease_calls_share_one_read() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let login = mock_login(&server, "s.lease").await;
	let read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let (path_a, path_b) = (path(), path());
	let (first, second): (Result<SecretLease>, Result<SecretLease>) =
		tokio::join!(leases.lease(&path_a), leases.lease(&path_b));
	let first = first.expect("First lease call should succeed.");
	let second = second.expect("Second lease call should succeed.");

	assert_same_material(&first, &second);

	login.assert_calls_async(1).await;
	read.assert_calls_async(1).await;
}

#[tokio::test]
async fn revoke_drops_lease_and_notifies() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, LeasePolicy::default());
	let _login = mock_login(&server, "s.lease").await;
	let _read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let revoke = server
		.mock_async(|when, then| {
			when.method(PUT).path(REVOKE_PATH).header("x-vault-token", "s.lease");
			then.status(204);
		})
		.await;

	leases.fetch(&path()).await.expect("Secret read should succeed.");

	let mut events = leases.subscribe();

	leases.revoke(&path()).await.expect("Revocation should succeed.");
	leases.revoke(&path()).await.expect("Revoking an empty slot is a no-op.");

	revoke.assert_calls_async(1).await;

	assert!(leases.current(&path()).is_none());
	assert!(matches!(
		events.try_recv(),
		Ok(LeaseEvent::Revoked { generation: 1, .. })
	));
}

#[tokio::test]
async fn superseded_lease_is_revoked_when_enabled() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let policy = LeasePolicy::default().with_revoke_superseded(true);
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, policy);
	let _login = mock_login(&server, "s.lease").await;
	let first = mock_read(&server, secret_body("database/creds/app/first", 3600, true)).await;

	leases.fetch(&path()).await.expect("First read should succeed.");
	first.delete_async().await;

	let _second = mock_read(&server, secret_body("database/creds/app/second", 3600, true)).await;
	let revoke = server
		.mock_async(|when, then| {
			when.method(PUT).path(REVOKE_PATH);
			then.status(204);
		})
		.await;
	let replacement = leases.fetch(&path()).await.expect("Second read should succeed.");

	assert_eq!(replacement.lease_id, "database/creds/app/second");

	revoke.assert_calls_async(1).await;

	assert_eq!(leases.metrics().revocations(), 1);
	assert_eq!(
		leases.current(&path()).map(|lease| lease.lease_id).as_deref(),
		Some("database/creds/app/second")
	);
}

#[tokio::test]
async fn background_renewal_runs_on_its_interval() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let policy = LeasePolicy::default().with_renewal_interval(Duration::SECOND);
	let leases = build_reqwest_test_leases(&server.base_url(), &clock, policy);
	let _login = mock_login(&server, "s.lease").await;
	let _read = mock_read(&server, secret_body(LEASE_ID, 3600, true)).await;
	let renew = mock_renew(
		&server,
		200,
		format!(r#"{{"lease_id":"{LEASE_ID}","lease_duration":3600,"renewable":true}}"#),
	)
	.await;

	leases.fetch(&path()).await.expect("Secret read should succeed.");
	clock.advance(Duration::seconds(3000));

	let handle = leases.spawn_renewal();

	tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
	drop(handle);

	renew.assert_calls_async(1).await;

	assert_eq!(leases.current(&path()).map(|lease| lease.obtained_at), Some(clock.now()));
}
