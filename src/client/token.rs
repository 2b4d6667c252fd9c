//! Access token lifecycle: lookup, renew-self, logout, and invalidation.

// self
use crate::{
	_prelude::*,
	api::{self, AuthResponse, TransportErrorMapper},
	auth::AccessToken,
	client::{BrokerClient, TOKEN_HEADER},
	error::RequestTarget,
	http::{BrokerHttpClient, BrokerRequest, HttpMethod},
	obs::{self, FlowKind},
};

const RENEW_SELF_PATH: &str = "auth/token/renew-self";
const REVOKE_SELF_PATH: &str = "auth/token/revoke-self";

impl<C, M> BrokerClient<C, M>
where
	C: ?Sized + BrokerHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns the held token if it is still active.
	pub fn current_token(&self) -> Option<AccessToken> {
		let now = self.clock.now();

		self.token.read().as_ref().filter(|token| token.is_active_at(now)).cloned()
	}

	/// Returns a usable token, renewing or logging in again once the held token enters its
	/// safety window.
	///
	/// When replacement fails but the held token has not expired yet, the held token is
	/// returned and the failure is only logged.
	pub async fn token(&self) -> Result<AccessToken> {
		let observed = self.installs();
		let now = self.clock.now();
		let held = self.current_token();

		match &held {
			Some(token) if !token.is_expiring_at(self.token_window, now) =>
				return Ok(token.to_owned()),
			_ => (),
		}

		let _singleflight = self.login_guard.lock().await;

		if let Some(token) = self.installed_since(observed) {
			return Ok(token);
		}

		let renewed = match &held {
			Some(token) if token.renewable => match self.renew_self_inner(token).await {
				Ok(token) => return Ok(token),
				Err(e) => Some(e),
			},
			_ => None,
		};

		#[cfg(feature = "tracing")]
		if let Some(err) = &renewed {
			tracing::debug!(error = %err, "Token renewal failed; logging in again.");
		}
		#[cfg(not(feature = "tracing"))]
		let _ = renewed;

		match obs::observe(FlowKind::Login, "token", self.login_locked()).await {
			Ok(token) => Ok(token),
			Err(err) => match self.current_token() {
				Some(token) => {
					#[cfg(feature = "tracing")]
					tracing::warn!(
						error = %err,
						accessor = token.accessor.as_deref().unwrap_or("-"),
						"Login failed; keeping the unexpired token."
					);
					#[cfg(not(feature = "tracing"))]
					let _ = err;

					Ok(token)
				},
				None => Err(err),
			},
		}
	}

	/// Extends the held token in place of a fresh login.
	///
	/// Fails with [`Error::Unauthenticated`] without a token and with [`Error::NotRenewable`]
	/// (before any network call) when the broker marked the token non-renewable. A 401/403
	/// clears the held token.
	pub async fn renew_self(&self) -> Result<AccessToken> {
		let token = self.current_token().ok_or(Error::Unauthenticated)?;

		self.renew_self_inner(&token).await
	}

	/// Revokes the held token at the broker and clears it locally.
	///
	/// The local slot is cleared first, so later calls never reuse the token even if the
	/// broker call fails. A token the broker no longer recognizes counts as logged out.
	pub async fn logout(&self) -> Result<()> {
		const KIND: FlowKind = FlowKind::Logout;

		let taken = self.token.write().take();
		let Some(token) = taken else {
			return Ok(());
		};

		obs::observe(KIND, "logout", async move {
			let target = RequestTarget::path(REVOKE_SELF_PATH);
			let request =
				BrokerRequest::new(HttpMethod::Post, self.config.endpoint(REVOKE_SELF_PATH)?)
					.header(TOKEN_HEADER, token.token.expose());

			match self.send(KIND, &target, request).await {
				Ok(_) => Ok(()),
				Err(err) if err.is_auth_failure() => Ok(()),
				Err(err) => Err(err),
			}
		})
		.await
	}

	/// Clears the held token if it is still `token`; returns whether anything was cleared.
	pub fn invalidate(&self, token: &AccessToken) -> bool {
		let mut slot = self.token.write();

		match slot.as_ref() {
			Some(current) if current.sequence == token.sequence => {
				*slot = None;

				true
			},
			_ => false,
		}
	}

	async fn renew_self_inner(&self, token: &AccessToken) -> Result<AccessToken> {
		const KIND: FlowKind = FlowKind::RenewSelf;

		if !token.renewable {
			return Err(Error::NotRenewable { what: "access token".into() });
		}

		obs::observe(KIND, "renew_self", async move {
			let started = self.clock.now();
			let target = RequestTarget::path(RENEW_SELF_PATH);
			let request =
				BrokerRequest::new(HttpMethod::Post, self.config.endpoint(RENEW_SELF_PATH)?)
					.header(TOKEN_HEADER, token.token.expose())
					.json_body(b"{}".to_vec());
			let sequence = self.next_sequence();
			let response = match self.send(KIND, &target, request).await {
				Ok(response) => response,
				Err(err) => {
					if err.is_auth_failure() {
						self.invalidate(token);
					}

					return Err(err);
				},
			};
			let renewed = api::access_token(
				KIND,
				api::decode::<AuthResponse>(KIND, &response.body)?,
				started,
				sequence,
			)?;

			Ok(self.install(renewed))
		})
		.await
	}
}
