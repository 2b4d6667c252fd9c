// std
use std::{
	collections::VecDeque,
	error::Error as StdError,
	fmt::{Display, Formatter, Result as FmtResult},
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};
// crates.io
use parking_lot::Mutex;
use time::Duration;
// self
use secret_lease_broker::{
	api::TransportErrorMapper,
	auth::{RoleName, Sensitive},
	client::BrokerClient,
	config::{BrokerConfig, RetryPolicy},
	error::{Error, TransportError},
	http::{BrokerHttpClient, BrokerRequest, BrokerResponse, HttpFuture, ResponseMetadata},
	identity::{AwsCredentials, AwsIamIdentity, StaticCredentialSource},
	obs::FlowKind,
};

const LOGIN_BODY: &str = r#"{"auth":{"client_token":"s.fake","lease_duration":3600,"renewable":true}}"#;

#[derive(Debug)]
struct FakeTransportError;
impl Display for FakeTransportError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Connection reset by fake peer.")
	}
}
impl StdError for FakeTransportError {}

enum Step {
	Respond(BrokerResponse),
	Fail,
	Stall(std::time::Duration),
}

#[derive(Default)]
struct ScriptedHttpClient {
	steps: Mutex<VecDeque<Step>>,
	calls: AtomicUsize,
	requests: Mutex<Vec<BrokerRequest>>,
}
impl ScriptedHttpClient {
	fn new(steps: impl IntoIterator<Item = Step>) -> Self {
		Self { steps: Mutex::new(steps.into_iter().collect()), ..Default::default() }
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl BrokerHttpClient for ScriptedHttpClient {
	type TransportError = FakeTransportError;

	fn execute(
		&self,
		request: BrokerRequest,
	) -> HttpFuture<'_, BrokerResponse, Self::TransportError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.requests.lock().push(request);

		let step = self.steps.lock().pop_front();

		Box::pin(async move {
			match step.expect("Scripted client ran out of steps.") {
				Step::Respond(response) => Ok(response),
				Step::Fail => Err(FakeTransportError),
				Step::Stall(delay) => {
					tokio::time::sleep(delay).await;

					Ok(BrokerResponse::new(200, LOGIN_BODY))
				},
			}
		})
	}
}

#[derive(Default)]
struct RecordingMapper {
	mapped: Mutex<Vec<FlowKind>>,
}
impl TransportErrorMapper<FakeTransportError> for RecordingMapper {
	fn map_transport_error(&self, operation: FlowKind, error: FakeTransportError) -> Error {
		self.mapped.lock().push(operation);

		TransportError::network(error).into()
	}
}

fn throttled(retry_after_secs: i64) -> BrokerResponse {
	BrokerResponse {
		metadata: ResponseMetadata {
			status: 429,
			retry_after: Some(Duration::seconds(retry_after_secs)),
		},
		body: br#"{"errors":["rate limited"]}"#.to_vec(),
	}
}

fn build_client(
	http: Arc<ScriptedHttpClient>,
	mapper: Arc<RecordingMapper>,
	retry: RetryPolicy,
) -> BrokerClient<ScriptedHttpClient, RecordingMapper> {
	let config = BrokerConfig::builder()
		.address("http://127.0.0.1:8200")
		.role(RoleName::new("my-role-iam").expect("Role should be valid."))
		.build()
		.expect("Config should build.");
	let identity = AwsIamIdentity::new(Arc::new(StaticCredentialSource(AwsCredentials {
		access_key_id: "AKIDEXAMPLE".into(),
		secret_access_key: Sensitive::new("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
		session_token: Some(Sensitive::new("session-token-value")),
	})))
	.expect("Identity should build.");

	BrokerClient::<ScriptedHttpClient, RecordingMapper>::with_http_client(
		config,
		Arc::new(identity),
		http,
		mapper,
	)
	.with_retry_policy(retry)
}

#[tokio::test]
async fn upstream_failures_exhaust_the_retry_budget() {
	let http = Arc::new(ScriptedHttpClient::new([
		Step::Respond(BrokerResponse::new(503, "")),
		Step::Respond(BrokerResponse::new(502, "")),
		Step::Respond(BrokerResponse::new(503, "")),
	]));
	let client = build_client(http.clone(), Default::default(), RetryPolicy::immediate(3));
	let err = client.login().await.expect_err("Exhausted retries must fail.");

	assert!(err.is_retryable());
	assert!(matches!(err, Error::Transport(TransportError::Upstream { status: 503, .. })));
	assert_eq!(http.calls(), 3);
	assert!(client.current_token().is_none());
}

#[tokio::test]
async fn retry_recovers_after_a_transient_failure() {
	let http = Arc::new(ScriptedHttpClient::new([
		Step::Fail,
		Step::Respond(BrokerResponse::new(500, "")),
		Step::Respond(BrokerResponse::new(200, LOGIN_BODY)),
	]));
	let mapper = Arc::new(RecordingMapper::default());
	let client = build_client(http.clone(), mapper.clone(), RetryPolicy::immediate(3));
	let token = client.login().await.expect("Third attempt should succeed.");

	assert_eq!(token.token.expose(), "s.fake");
	assert_eq!(http.calls(), 3);
	assert_eq!(*mapper.mapped.lock(), vec![FlowKind::Login]);

	let requests = http.requests.lock();

	assert!(
		requests.iter().all(|request| request.header_value("X-Vault-Request") == Some("true"))
	);
	assert!(requests.iter().all(|request| request.url.path() == "/v1/auth/aws/login"));
}

#[tokio::test]
async fn retry_after_hint_is_propagated() {
	let http = Arc::new(ScriptedHttpClient::new([Step::Respond(throttled(7))]));
	let client = build_client(http.clone(), Default::default(), RetryPolicy::immediate(1));

	match client.login().await {
		Err(Error::Transport(err)) => {
			assert_eq!(err.retry_after(), Some(Duration::seconds(7)));
			assert!(matches!(err, TransportError::Upstream { status: 429, .. }));
		},
		other => panic!("Expected a throttled transport error, got {other:?}."),
	}

	assert_eq!(http.calls(), 1);
}

#[tokio::test]
async fn retry_after_hint_is_capped_by_the_policy() {
	let http = Arc::new(ScriptedHttpClient::new([
		Step::Respond(throttled(30)),
		Step::Respond(BrokerResponse::new(200, LOGIN_BODY)),
	]));
	let retry = RetryPolicy {
		max_attempts: 2,
		base_delay: Duration::ZERO,
		max_delay: Duration::milliseconds(20),
	};
	let client = build_client(http.clone(), Default::default(), retry);
	let started = std::time::Instant::now();

	client.login().await.expect("Second attempt should succeed.");

	assert_eq!(http.calls(), 2);
	assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn slow_broker_maps_to_timeout() {
	let http = Arc::new(ScriptedHttpClient::new([Step::Stall(
		std::time::Duration::from_millis(500),
	)]));
	let client = build_client(http.clone(), Default::default(), RetryPolicy::immediate(1))
		.with_request_timeout(Duration::milliseconds(50));

	match client.login().await {
		Err(Error::Transport(TransportError::Timeout { after })) =>
			assert_eq!(after, Duration::milliseconds(50)),
		other => panic!("Expected a timeout, got {other:?}."),
	}
}

#[tokio::test]
async fn rejections_are_not_retried_and_never_echo_credentials() {
	let http = Arc::new(ScriptedHttpClient::new([Step::Respond(BrokerResponse::new(
		400,
		r#"{"errors":["error validating token: expired"]}"#,
	))]));
	let client = build_client(http.clone(), Default::default(), RetryPolicy::immediate(3));
	let err = client.login().await.expect_err("Rejected login must fail.");
	let rendered = format!("{err} {err:?}");

	assert_eq!(http.calls(), 1);
	assert!(rendered.contains("error validating token: expired"));
	assert!(!rendered.contains("wJalrXUtnFEMI"));
	assert!(!rendered.contains("session-token-value"));

	let requests = http.requests.lock();
	let request = format!("{:?}", requests[0]);

	assert!(!request.contains("session-token-value"));
}
