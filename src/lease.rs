//! Dynamic secret leases: fetch, renew, revoke, and keep them alive in the background.
//!
//! [`LeaseManager`] holds exactly one lease per [`SecretPath`]. Every mutation of a path's slot
//! happens under that path's async guard, and callers that waited on the guard re-check the slot
//! before going to the network, so concurrent [`LeaseManager::lease`] calls share one read.
//! Renewals are installed with a compare-and-swap on the lease ID; a renewal that raced a fresh
//! read never overwrites the newer lease.
//!
//! Consumers never receive an expired lease. An expiring lease is renewed (or re-read when the
//! broker marked it non-renewable); if that fails while the lease is still active it keeps being
//! served, and once it expires the next [`LeaseManager::lease`] call reads a brand-new one. A
//! renewal the broker capped so short that the lease would re-enter its safety window before the
//! next renewal pass is followed by a fresh read.

pub mod metrics;

mod renewal;

pub use metrics::LeaseMetrics;
pub use renewal::*;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	api::{
		self, RenewLeaseRequest, RenewLeaseResponse, RevokeLeaseRequest, SecretResponse,
		TransportErrorMapper,
	},
	auth::{self, SafetyWindow, SecretLease, SecretPath},
	client::BrokerClient,
	config::LeasePolicy,
	error::RequestTarget,
	http::{BrokerHttpClient, BrokerRequest, HttpMethod},
	obs::{self, FlowKind},
};
#[cfg(feature = "reqwest")]
use crate::{api::ReqwestTransportErrorMapper, http::ReqwestHttpClient};

const RENEW_PATH: &str = "sys/leases/renew";
const REVOKE_PATH: &str = "sys/leases/revoke";
const EVENT_CAPACITY: usize = 64;

#[cfg(feature = "reqwest")]
/// Lease manager specialized for the crate's default reqwest transport stack.
pub type ReqwestLeaseManager = LeaseManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

enum Refreshed {
	Renewed(SecretLease),
	Refetched(SecretLease),
}
impl Refreshed {
	fn into_lease(self) -> SecretLease {
		match self {
			Self::Renewed(lease) | Self::Refetched(lease) => lease,
		}
	}
}

/// Lease transitions broadcast to [`LeaseManager::subscribe`] receivers.
#[derive(Clone, Debug)]
pub enum LeaseEvent {
	/// A fresh read installed new credential material for a path.
	Replaced(SecretLease),
	/// A lease was extended; its credential material is unchanged.
	Renewed(SecretLease),
	/// A lease was revoked and its slot dropped.
	Revoked {
		/// Path whose lease was revoked.
		path: SecretPath,
		/// Generation of the revoked lease.
		generation: u64,
	},
	/// A lease outlived its duration and was dropped.
	Expired {
		/// Path whose lease expired.
		path: SecretPath,
		/// Generation of the expired lease.
		generation: u64,
	},
}
impl LeaseEvent {
	/// Path the event concerns.
	pub fn path(&self) -> &SecretPath {
		match self {
			Self::Replaced(lease) | Self::Renewed(lease) => &lease.path,
			Self::Revoked { path, .. } | Self::Expired { path, .. } => path,
		}
	}
}

/// Outcome counts of one [`LeaseManager::run_renewal_pass`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenewalReport {
	/// Leases extended in place.
	pub renewed: usize,
	/// Leases replaced by a fresh read: non-renewable, expired, or capped on renewal.
	pub refetched: usize,
	/// Leases found expired.
	pub expired: usize,
	/// Renewals or reads that failed.
	pub failed: usize,
}

/// Owns the active lease of every secret path read through it.
pub struct LeaseManager<C, M>
where
	C: ?Sized + BrokerHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	client: Arc<BrokerClient<C, M>>,
	policy: LeasePolicy,
	leases: RwLock<HashMap<SecretPath, SecretLease>>,
	guards: Mutex<HashMap<SecretPath, Arc<AsyncMutex<()>>>>,
	events: broadcast::Sender<LeaseEvent>,
	generation: AtomicU64,
	metrics: Arc<LeaseMetrics>,
}
impl<C, M> LeaseManager<C, M>
where
	C: ?Sized + BrokerHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a manager that reads secrets with `client`'s token.
	pub fn new(client: Arc<BrokerClient<C, M>>, policy: LeasePolicy) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);

		Self {
			client,
			policy,
			leases: RwLock::new(HashMap::new()),
			guards: Mutex::new(HashMap::new()),
			events,
			generation: AtomicU64::new(0),
			metrics: Default::default(),
		}
	}

	/// Broker client used for every read.
	pub fn client(&self) -> &Arc<BrokerClient<C, M>> {
		&self.client
	}

	/// Lease policy in effect.
	pub fn policy(&self) -> &LeasePolicy {
		&self.policy
	}

	/// In-process lease counters.
	pub fn metrics(&self) -> Arc<LeaseMetrics> {
		self.metrics.clone()
	}

	/// Subscribes to lease transitions. Receivers only see events sent after subscribing.
	pub fn subscribe(&self) -> broadcast::Receiver<LeaseEvent> {
		self.events.subscribe()
	}

	/// Returns `true` once `lease` has entered the final `window` fraction of its duration.
	pub fn is_expiring(&self, lease: &SecretLease, window: SafetyWindow) -> bool {
		lease.is_expiring_at(window, self.client.clock().now())
	}

	/// The held lease for `path`, if it is still active.
	pub fn current(&self, path: &SecretPath) -> Option<SecretLease> {
		let now = self.client.clock().now();

		self.slot(path).filter(|lease| lease.is_active_at(now))
	}

	/// Reads a brand-new lease for `path` and installs it, superseding any held lease.
	pub async fn fetch(&self, path: &SecretPath) -> Result<SecretLease> {
		let guard = self.guard(path);
		let _singleflight = guard.lock().await;

		self.fetch_locked(path).await
	}

	/// Serves the held lease for `path`, renewing or replacing it as the lease policy requires.
	///
	/// Returns [`Error::LeaseExpired`] when the held lease expired and no replacement could be
	/// read.
	pub async fn lease(&self, path: &SecretPath) -> Result<SecretLease> {
		let window = self.policy.safety_window;

		if let Some(lease) = self.fresh(path, window) {
			return Ok(lease);
		}

		let guard = self.guard(path);
		let _singleflight = guard.lock().await;
		let now = self.client.clock().now();

		match self.slot(path) {
			None => self.fetch_locked(path).await,
			Some(lease) if !lease.is_active_at(now) => {
				self.expire(&lease);

				self.fetch_locked(path).await.map_err(|e| Error::LeaseExpired {
					path: path.to_string(),
					source: Some(Box::new(e)),
				})
			},
			Some(lease) if !lease.is_expiring_at(window, now) => Ok(lease),
			Some(lease) => {
				match self.refresh_locked(&lease, window).await.map(Refreshed::into_lease) {
					Ok(lease) => Ok(lease),
					Err(err) => {
						#[cfg(feature = "tracing")]
						tracing::warn!(
							path = %path,
							generation = lease.generation,
							error = %err,
							"Lease refresh failed; serving the current lease."
						);

						self.serve_if_active(lease, err)
					},
				}
			},
		}
	}

	/// Extends `lease` at the broker.
	///
	/// Non-renewable leases fail with [`Error::NotRenewable`] before any network call. The
	/// renewed lease replaces the held one only if the slot still holds the same lease ID.
	pub async fn renew(&self, lease: &SecretLease) -> Result<SecretLease> {
		if !lease.renewable {
			return Err(Error::NotRenewable { what: format!("lease for `{}`", lease.path) });
		}

		let guard = self.guard(&lease.path);
		let _singleflight = guard.lock().await;

		self.renew_locked(lease).await
	}

	/// Revokes the held lease for `path` at the broker and drops it locally.
	///
	/// The slot is dropped first, so the lease is never served again even if the broker call
	/// fails.
	pub async fn revoke(&self, path: &SecretPath) -> Result<()> {
		let guard = self.guard(path);
		let _singleflight = guard.lock().await;
		let removed = self.leases.write().remove(path);
		let Some(lease) = removed else {
			return Ok(());
		};

		self.revoke_lease(&lease).await
	}

	/// Renews or replaces every held lease that entered its safety window.
	///
	/// Renewable leases are extended; non-renewable and expired ones are read again.
	pub async fn run_renewal_pass(&self) -> RenewalReport {
		let window = self.policy.safety_window;
		let paths = self.leases.read().keys().cloned().collect::<Vec<_>>();
		let mut report = RenewalReport::default();

		for path in paths {
			let guard = self.guard(&path);
			let _singleflight = guard.lock().await;
			let now = self.client.clock().now();
			let Some(lease) = self.slot(&path) else {
				continue;
			};
			let expired = !lease.is_active_at(now);

			if expired {
				self.expire(&lease);

				report.expired += 1;
			} else if !lease.is_expiring_at(window, now) {
				continue;
			}

			let refreshed = if expired {
				self.fetch_locked(&path).await.map(|_| report.refetched += 1)
			} else {
				self.refresh_locked(&lease, window).await.map(|refreshed| match refreshed {
					Refreshed::Renewed(_) => report.renewed += 1,
					Refreshed::Refetched(_) => report.refetched += 1,
				})
			};

			if let Err(_err) = refreshed {
				#[cfg(feature = "tracing")]
				tracing::warn!(
					path = %path,
					generation = lease.generation,
					error = %_err,
					"Background lease refresh failed."
				);

				report.failed += 1;
			}
		}

		#[cfg(feature = "tracing")]
		tracing::debug!(
			renewed = report.renewed,
			refetched = report.refetched,
			expired = report.expired,
			failed = report.failed,
			"Lease renewal pass finished."
		);

		report
	}

	fn guard(&self, path: &SecretPath) -> Arc<AsyncMutex<()>> {
		let mut guards = self.guards.lock();

		guards.entry(path.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	fn slot(&self, path: &SecretPath) -> Option<SecretLease> {
		self.leases.read().get(path).cloned()
	}

	fn fresh(&self, path: &SecretPath, window: SafetyWindow) -> Option<SecretLease> {
		let now = self.client.clock().now();

		self.slot(path).filter(|lease| lease.is_active_at(now) && !lease.is_expiring_at(window, now))
	}

	fn next_generation(&self) -> u64 {
		self.generation.fetch_add(1, Ordering::SeqCst) + 1
	}

	fn emit(&self, event: LeaseEvent) {
		// No receivers is fine.
		let _ = self.events.send(event);
	}

	fn serve_if_active(&self, lease: SecretLease, err: Error) -> Result<SecretLease> {
		if lease.is_active_at(self.client.clock().now()) {
			return Ok(lease);
		}

		self.expire(&lease);

		Err(Error::LeaseExpired { path: lease.path.to_string(), source: Some(Box::new(err)) })
	}

	/// Drops `lease` from its slot if it is still the held one.
	fn expire(&self, lease: &SecretLease) {
		let removed = {
			let mut leases = self.leases.write();

			match leases.get(&lease.path) {
				Some(current) if current.lease_id == lease.lease_id => {
					leases.remove(&lease.path);

					true
				},
				_ => false,
			}
		};

		if removed {
			#[cfg(feature = "tracing")]
			tracing::warn!(path = %lease.path, generation = lease.generation, "Lease expired.");

			self.metrics.record_expiration();
			self.emit(LeaseEvent::Expired {
				path: lease.path.clone(),
				generation: lease.generation,
			});
		}
	}

	async fn fetch_locked(&self, path: &SecretPath) -> Result<SecretLease> {
		const KIND: FlowKind = FlowKind::Fetch;

		let lease = obs::observe(KIND, "fetch", async move {
			let started = self.client.clock().now();
			let target = RequestTarget::path(path.as_ref());
			let request = BrokerRequest::new(HttpMethod::Get, self.client.config().endpoint(path)?);
			let response = self.client.send_authorized(KIND, &target, request).await?;

			api::secret_lease(
				path,
				api::decode::<SecretResponse>(KIND, &response.body)?,
				started,
				self.next_generation(),
			)
		})
		.await
		.inspect_err(|_| self.metrics.record_fetch_failure())?;
		let previous = self.leases.write().insert(path.clone(), lease.clone());

		#[cfg(feature = "tracing")]
		tracing::info!(
			path = %path,
			generation = lease.generation,
			ttl_secs = lease.duration.whole_seconds(),
			renewable = lease.renewable,
			"Lease obtained."
		);

		self.metrics.record_fetch();
		self.emit(LeaseEvent::Replaced(lease.clone()));

		match previous {
			Some(previous)
				if self.policy.revoke_superseded
					&& previous.lease_id != lease.lease_id
					&& previous.is_active_at(self.client.clock().now()) =>
				self.revoke_superseded(previous).await,
			_ => (),
		}

		Ok(lease)
	}

	async fn revoke_superseded(&self, previous: SecretLease) {
		if let Err(_err) = self.revoke_lease(&previous).await {
			#[cfg(feature = "tracing")]
			tracing::warn!(
				path = %previous.path,
				generation = previous.generation,
				error = %_err,
				"Could not revoke the superseded lease."
			);
		}
	}

	/// Renews `lease` when the broker allows it, otherwise reads a fresh one.
	///
	/// A renewal capped by the broker shortens the lease. When the shortened lease would enter
	/// its safety window before the next renewal pass, a fresh lease is read instead; renewing it
	/// again would only shrink it further.
	async fn refresh_locked(
		&self,
		lease: &SecretLease,
		window: SafetyWindow,
	) -> Result<Refreshed> {
		if !lease.renewable {
			return self.fetch_locked(&lease.path).await.map(Refreshed::Refetched);
		}

		let renewed = self.renew_locked(lease).await?;
		let next_pass =
			auth::lease::saturating_offset(self.client.clock().now(), self.policy.renewal_interval);

		if renewed.duration >= lease.duration || !renewed.is_expiring_at(window, next_pass) {
			return Ok(Refreshed::Renewed(renewed));
		}

		#[cfg(feature = "tracing")]
		tracing::info!(
			path = %lease.path,
			generation = lease.generation,
			ttl_secs = renewed.duration.whole_seconds(),
			"Renewal was capped inside the safety window; reading a fresh lease."
		);

		match self.fetch_locked(&lease.path).await {
			Ok(fresh) => Ok(Refreshed::Refetched(fresh)),
			Err(_err) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(
					path = %lease.path,
					generation = renewed.generation,
					error = %_err,
					"Fresh read after a capped renewal failed; keeping the renewed lease."
				);

				Ok(Refreshed::Renewed(renewed))
			},
		}
	}

	async fn renew_locked(&self, lease: &SecretLease) -> Result<SecretLease> {
		const KIND: FlowKind = FlowKind::Renew;

		if !lease.renewable {
			return Err(Error::NotRenewable { what: format!("lease for `{}`", lease.path) });
		}

		let renewed = obs::observe(KIND, "renew", async move {
			let started = self.client.clock().now();
			let body = api::encode(
				KIND,
				&RenewLeaseRequest {
					lease_id: &lease.lease_id,
					increment: self.policy.renew_increment.map(|increment| increment.whole_seconds()),
				},
			)?;
			let target = RequestTarget::path(RENEW_PATH);
			let request =
				BrokerRequest::new(HttpMethod::Put, self.client.config().endpoint(RENEW_PATH)?)
					.json_body(body);
			let response = self.client.send_authorized(KIND, &target, request).await?;

			api::renewed_lease(
				lease,
				api::decode::<RenewLeaseResponse>(KIND, &response.body)?,
				started,
			)
		})
		.await
		.inspect_err(|_| self.metrics.record_renewal_failure())?;
		let installed = {
			let mut leases = self.leases.write();

			match leases.get_mut(&lease.path) {
				Some(current) if current.lease_id == lease.lease_id => {
					*current = renewed.clone();

					true
				},
				_ => false,
			}
		};

		self.metrics.record_renewal();

		if installed {
			#[cfg(feature = "tracing")]
			tracing::info!(
				path = %renewed.path,
				generation = renewed.generation,
				ttl_secs = renewed.duration.whole_seconds(),
				"Lease renewed."
			);

			self.emit(LeaseEvent::Renewed(renewed.clone()));
		}

		Ok(renewed)
	}

	async fn revoke_lease(&self, lease: &SecretLease) -> Result<()> {
		const KIND: FlowKind = FlowKind::Revoke;

		obs::observe(KIND, "revoke", async move {
			let body = api::encode(KIND, &RevokeLeaseRequest { lease_id: &lease.lease_id })?;
			let target = RequestTarget::path(REVOKE_PATH);
			let request =
				BrokerRequest::new(HttpMethod::Put, self.client.config().endpoint(REVOKE_PATH)?)
					.json_body(body);

			self.client.send_authorized(KIND, &target, request).await?;

			Ok(())
		})
		.await?;

		#[cfg(feature = "tracing")]
		tracing::info!(path = %lease.path, generation = lease.generation, "Lease revoked.");

		self.metrics.record_revocation();
		self.emit(LeaseEvent::Revoked { path: lease.path.clone(), generation: lease.generation });

		Ok(())
	}
}
impl<C, M> Debug for LeaseManager<C, M>
where
	C: ?Sized + BrokerHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LeaseManager")
			.field("policy", &self.policy)
			.field("paths", &self.leases.read().keys().collect::<Vec<_>>())
			.field("metrics", &self.metrics)
			.finish()
	}
}
