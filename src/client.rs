//! Secret broker client: exchanges identity assertions for access tokens and owns token state.
//!
//! [`BrokerClient`] holds at most one [`AccessToken`]. Login, renew-self, and logout replace or
//! clear that slot wholesale; a token produced by a slower exchange never overwrites a newer one.
//! Concurrent [`BrokerClient::login`] callers share one round trip: whoever waited on the login
//! guard while another caller installed a token returns that token.

mod login;
mod token;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	api::{self, TransportErrorMapper},
	auth::{AccessToken, SafetyWindow},
	clock::{Clock, SystemClock},
	config::{BrokerConfig, RetryPolicy},
	error::{RequestTarget, TransportError},
	http::{BrokerHttpClient, BrokerRequest, BrokerResponse},
	identity::IdentityProvider,
	obs::FlowKind,
};
#[cfg(feature = "reqwest")]
use crate::{
	api::ReqwestTransportErrorMapper,
	config::Settings,
	http::ReqwestHttpClient,
	identity::{AwsIamIdentity, EnvCredentialSource},
};

/// Header carrying the access token.
pub const TOKEN_HEADER: &str = "X-Vault-Token";
/// Header carrying the broker namespace.
pub const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
/// Header every broker request carries.
pub const REQUEST_HEADER: &str = "X-Vault-Request";

#[cfg(feature = "reqwest")]
/// Client specialized for the crate's default reqwest transport stack.
pub type ReqwestBrokerClient = BrokerClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Talks to one broker as one role.
pub struct BrokerClient<C, M>
where
	C: ?Sized + BrokerHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every outbound broker request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors before surfacing them to callers.
	pub transport_mapper: Arc<M>,
	config: BrokerConfig,
	identity: Arc<dyn IdentityProvider>,
	clock: Arc<dyn Clock>,
	retry: RetryPolicy,
	request_timeout: Duration,
	token_window: SafetyWindow,
	token: RwLock<Option<AccessToken>>,
	login_guard: AsyncMutex<()>,
	sequence: AtomicU64,
	installs: AtomicU64,
}
impl<C, M> BrokerClient<C, M>
where
	C: ?Sized + BrokerHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::seconds(10);

	/// Creates a client that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		config: BrokerConfig,
		identity: Arc<dyn IdentityProvider>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			config,
			identity,
			clock: Arc::new(SystemClock),
			retry: RetryPolicy::default(),
			request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
			token_window: SafetyWindow::DEFAULT,
			token: RwLock::new(None),
			login_guard: AsyncMutex::new(()),
			sequence: AtomicU64::new(0),
			installs: AtomicU64::new(0),
		}
	}

	/// Overrides the time source.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Overrides the retry policy.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Overrides the per-call timeout (at least one millisecond).
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout.max(Duration::MILLISECOND);

		self
	}

	/// Overrides the window inside which [`token`](Self::token) renews or replaces the token.
	pub fn with_token_safety_window(mut self, window: SafetyWindow) -> Self {
		self.token_window = window;

		self
	}

	/// Broker configuration.
	pub fn config(&self) -> &BrokerConfig {
		&self.config
	}

	/// Time source shared with the lease manager.
	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	/// Sends `request` with retries, timeouts, and the common broker headers.
	///
	/// Only [`Error::Transport`] failures are retried, up to the policy's attempt budget.
	pub(crate) async fn send(
		&self,
		operation: FlowKind,
		target: &RequestTarget,
		request: BrokerRequest,
	) -> Result<BrokerResponse> {
		let request = self.decorate(request);
		let timeout = std::time::Duration::try_from(self.request_timeout).unwrap_or_default();
		let mut attempt = 1;

		loop {
			let outcome =
				match tokio::time::timeout(timeout, self.http_client.execute(request.clone())).await
				{
					Ok(Ok(response)) =>
						api::classify(operation, target, &response).map(|()| response),
					Ok(Err(e)) => Err(self.transport_mapper.map_transport_error(operation, e)),
					Err(_) => Err(TransportError::Timeout { after: self.request_timeout }.into()),
				};

			match outcome {
				Err(Error::Transport(err)) if attempt < self.retry.max_attempts => {
					let delay = self.retry.delay_for(attempt, err.retry_after());

					#[cfg(feature = "tracing")]
					tracing::warn!(
						flow = operation.as_str(),
						request = %target,
						attempt,
						max_attempts = self.retry.max_attempts,
						delay_ms = delay.whole_milliseconds(),
						error = %err,
						"Retrying broker call."
					);

					if delay.is_positive() {
						tokio::time::sleep(std::time::Duration::try_from(delay).unwrap_or_default())
							.await;
					}

					attempt += 1;
				},
				outcome => return outcome,
			}
		}
	}

	/// Sends `request` with the current access token, logging in again once if the broker
	/// rejects the token with 401/403.
	pub(crate) async fn send_authorized(
		&self,
		operation: FlowKind,
		target: &RequestTarget,
		request: BrokerRequest,
	) -> Result<BrokerResponse> {
		let token = self.token().await?;
		let first = request.clone().header(TOKEN_HEADER, token.token.expose());

		match self.send(operation, target, first).await {
			Err(err) if err.is_auth_failure() => {
				#[cfg(feature = "tracing")]
				tracing::warn!(
					flow = operation.as_str(),
					request = %target,
					accessor = token.accessor.as_deref().unwrap_or("-"),
					token = %token.token.fingerprint(),
					"Broker rejected the access token; logging in again."
				);

				self.invalidate(&token);

				let token = self.login().await?;

				self.send(operation, target, request.header(TOKEN_HEADER, token.token.expose()))
					.await
			},
			outcome => outcome,
		}
	}

	fn decorate(&self, mut request: BrokerRequest) -> BrokerRequest {
		request.headers.push((REQUEST_HEADER.into(), "true".into()));

		if let Some(namespace) = self.config.namespace() {
			request.headers.push((NAMESPACE_HEADER.into(), namespace.into()));
		}

		request
	}

	fn next_sequence(&self) -> u64 {
		self.sequence.fetch_add(1, Ordering::SeqCst) + 1
	}

	fn installs(&self) -> u64 {
		self.installs.load(Ordering::SeqCst)
	}

	/// Installs `token` unless a newer one is already held; returns whichever token won.
	fn install(&self, token: AccessToken) -> AccessToken {
		let mut slot = self.token.write();

		match slot.as_ref() {
			Some(current) if !token.supersedes(current) => current.clone(),
			_ => {
				*slot = Some(token.clone());
				self.installs.fetch_add(1, Ordering::SeqCst);

				token
			},
		}
	}
}
#[cfg(feature = "reqwest")]
impl BrokerClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a client backed by its own reqwest transport.
	pub fn new(config: BrokerConfig, identity: Arc<dyn IdentityProvider>) -> Self {
		Self::with_http_client(
			config,
			identity,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}

	/// Creates a client from environment [`Settings`], signing with ambient AWS credentials.
	pub fn from_settings(settings: &Settings) -> Result<Self> {
		let mut identity = AwsIamIdentity::new(Arc::new(EnvCredentialSource::new()))?;

		if let Some(region) = &settings.region {
			identity = identity.with_region(region.as_str())?;
		}

		Ok(Self::new(settings.broker.clone(), Arc::new(identity))
			.with_retry_policy(settings.retry.clone())
			.with_request_timeout(settings.request_timeout))
	}
}
impl<C, M> Debug for BrokerClient<C, M>
where
	C: ?Sized + BrokerHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BrokerClient")
			.field("config", &self.config)
			.field("retry", &self.retry)
			.field("request_timeout", &self.request_timeout)
			.field("token_held", &self.token.read().is_some())
			.finish()
	}
}
