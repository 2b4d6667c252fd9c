//! In-process lease counters.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for lease activity.
#[derive(Debug, Default)]
pub struct LeaseMetrics {
	fetches: AtomicU64,
	fetch_failures: AtomicU64,
	renewals: AtomicU64,
	renewal_failures: AtomicU64,
	revocations: AtomicU64,
	expirations: AtomicU64,
}
impl LeaseMetrics {
	/// Returns the number of successful secret reads.
	pub fn fetches(&self) -> u64 {
		self.fetches.load(Ordering::Relaxed)
	}

	/// Returns the number of failed secret reads.
	pub fn fetch_failures(&self) -> u64 {
		self.fetch_failures.load(Ordering::Relaxed)
	}

	/// Returns the number of successful renewals, including ones that lost the slot to a newer
	/// lease.
	pub fn renewals(&self) -> u64 {
		self.renewals.load(Ordering::Relaxed)
	}

	/// Returns the number of failed renewals.
	pub fn renewal_failures(&self) -> u64 {
		self.renewal_failures.load(Ordering::Relaxed)
	}

	/// Returns the number of leases revoked at the broker.
	pub fn revocations(&self) -> u64 {
		self.revocations.load(Ordering::Relaxed)
	}

	/// Returns the number of leases dropped because they expired.
	pub fn expirations(&self) -> u64 {
		self.expirations.load(Ordering::Relaxed)
	}

	pub(crate) fn record_fetch(&self) {
		self.fetches.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_fetch_failure(&self) {
		self.fetch_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_renewal(&self) {
		self.renewals.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_renewal_failure(&self) {
		self.renewal_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_revocation(&self) {
		self.revocations.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_expiration(&self) {
		self.expirations.fetch_add(1, Ordering::Relaxed);
	}
}
