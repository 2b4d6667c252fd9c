//! Identity assertion exchange with single-flight login.

// self
use crate::{
	_prelude::*,
	api::{self, AuthResponse, TransportErrorMapper},
	auth::AccessToken,
	client::BrokerClient,
	error::RequestTarget,
	http::{BrokerHttpClient, BrokerRequest, HttpMethod},
	identity::IdentityAssertion,
	obs::{self, FlowKind},
};

impl<C, M> BrokerClient<C, M>
where
	C: ?Sized + BrokerHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a fresh identity assertion and exchanges it for an access token.
	///
	/// Callers that waited on the login guard while another caller installed a token get that
	/// token back without a second round trip.
	pub async fn login(&self) -> Result<AccessToken> {
		const KIND: FlowKind = FlowKind::Login;

		obs::observe(KIND, "login", async move {
			let observed = self.installs();
			let _singleflight = self.login_guard.lock().await;

			if let Some(token) = self.installed_since(observed) {
				return Ok(token);
			}

			self.login_locked().await
		})
		.await
	}

	/// Exchanges a caller-built assertion for an access token and installs it.
	///
	/// The assertion is consumed. Assertions outside their signing window are refused locally
	/// with [`Error::SigningFailed`]. A broker rejection leaves the current token untouched.
	pub async fn exchange(&self, assertion: IdentityAssertion) -> Result<AccessToken> {
		obs::observe(FlowKind::Login, "exchange", self.exchange_assertion(assertion)).await
	}

	/// Returns the held token if it was installed after `observed` and is still usable.
	pub(super) fn installed_since(&self, observed: u64) -> Option<AccessToken> {
		if self.installs() == observed {
			return None;
		}

		self.current_token()
	}

	/// Performs the login round trip; the caller holds the login guard.
	pub(super) async fn login_locked(&self) -> Result<AccessToken> {
		let assertion = self.identity.build(self.config.server_id())?;

		self.exchange_assertion(assertion).await
	}

	async fn exchange_assertion(&self, assertion: IdentityAssertion) -> Result<AccessToken> {
		const KIND: FlowKind = FlowKind::Login;

		let started = self.clock.now();

		if !assertion.is_fresh_at(started) {
			return Err(Error::SigningFailed {
				reason: "identity assertion is outside its signing window".into(),
			});
		}

		let payload = assertion.encode(self.config.role())?;

		drop(assertion);

		let body = api::encode(KIND, &payload)?;
		let path = self.config.login_path();
		let target = RequestTarget::path(path.as_str()).with_role(self.config.role().as_ref());
		let request =
			BrokerRequest::new(HttpMethod::Post, self.config.endpoint(&path)?).json_body(body);
		let sequence = self.next_sequence();
		let response = self.send(KIND, &target, request).await?;
		let token = api::access_token(
			KIND,
			api::decode::<AuthResponse>(KIND, &response.body)?,
			started,
			sequence,
		)?;
		let token = self.install(token);

		#[cfg(feature = "tracing")]
		tracing::info!(
			request = %target,
			accessor = token.accessor.as_deref().unwrap_or("-"),
			ttl_secs = token.ttl.map(|ttl| ttl.whole_seconds()),
			renewable = token.renewable,
			"Logged in to the secret broker."
		);

		Ok(token)
	}
}
