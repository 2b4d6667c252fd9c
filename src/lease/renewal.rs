//! Background renewal task driving [`LeaseManager::run_renewal_pass`].

// crates.io
use tokio::{
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
// self
use crate::{
	_prelude::*,
	api::TransportErrorMapper,
	http::BrokerHttpClient,
	lease::LeaseManager,
};

/// Owns the background renewal task; dropping the handle stops it.
#[derive(Debug)]
pub struct RenewalHandle {
	task: JoinHandle<()>,
}
impl RenewalHandle {
	/// Stops the task.
	pub fn abort(&self) {
		self.task.abort();
	}

	/// Returns `true` once the task stopped, either aborted or because the manager was dropped.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}
impl Drop for RenewalHandle {
	fn drop(&mut self) {
		self.task.abort();
	}
}

impl<C, M> LeaseManager<C, M>
where
	C: ?Sized + BrokerHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Runs [`run_renewal_pass`](Self::run_renewal_pass) every
	/// [`renewal_interval`](crate::config::LeasePolicy::renewal_interval) on the current tokio
	/// runtime.
	///
	/// The task holds a weak reference and stops on its own once the manager is dropped.
	///
	/// # Panics
	///
	/// Panics when called outside a tokio runtime.
	pub fn spawn_renewal(self: &Arc<Self>) -> RenewalHandle {
		let manager = Arc::downgrade(self);
		let period = std::time::Duration::try_from(self.policy().renewal_interval)
			.unwrap_or(std::time::Duration::from_secs(1));
		let task = tokio::spawn(async move {
			let mut ticker = time::interval_at(time::Instant::now() + period, period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				ticker.tick().await;

				let Some(manager) = manager.upgrade() else {
					break;
				};

				manager.run_renewal_pass().await;
			}

			#[cfg(feature = "tracing")]
			tracing::debug!("Lease manager dropped; background renewal stopped.");
		});

		RenewalHandle { task }
	}
}
