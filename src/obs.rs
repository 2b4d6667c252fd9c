//! Optional observability helpers for broker flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `secret_broker.flow` with the `flow`
//!   (operation) and `stage` (call site) fields, plus events for retries and lease transitions.
//! - Enable `metrics` to increment the `secret_broker_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`, and to record each operation's wall
//!   time in the `secret_broker_flow_duration_seconds` histogram.
//!
//! Nothing emitted here carries token values or secret payloads.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Broker operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Identity assertion exchange for an access token.
	Login,
	/// Access token `renew-self`.
	RenewSelf,
	/// Access token `revoke-self`.
	Logout,
	/// Dynamic secret read.
	Fetch,
	/// Lease renewal.
	Renew,
	/// Lease revocation.
	Revoke,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Login => "login",
			FlowKind::RenewSelf => "renew_self",
			FlowKind::Logout => "logout",
			FlowKind::Fetch => "fetch",
			FlowKind::Renew => "renew",
			FlowKind::Revoke => "revoke",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a broker operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records attempt/success/failure and wall time around `fut` inside a `secret_broker.flow` span.
pub(crate) async fn observe<T, Fut>(kind: FlowKind, stage: &'static str, fut: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	let span = FlowSpan::new(kind, stage);
	let started = std::time::Instant::now();

	record_flow_outcome(kind, FlowOutcome::Attempt);

	let result = span.instrument(fut).await;
	let elapsed = started.elapsed();
	let outcome = if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure };

	#[cfg(feature = "tracing")]
	{
		if let Err(e) = &result {
			::tracing::debug!(flow = kind.as_str(), stage, error = %e, "Broker flow failed.");
		}
	}

	span.finish(outcome, elapsed);
	record_flow_outcome(kind, outcome);
	record_flow_duration(kind, elapsed);

	result
}
