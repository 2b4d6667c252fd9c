//! Optional `metrics` facade recorders for broker operations.

// self
use crate::obs::{FlowKind, FlowOutcome};

/// Increments `secret_broker_flow_total{flow, outcome}` (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"secret_broker_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records the wall time of one broker operation in
/// `secret_broker_flow_duration_seconds{flow}` (when enabled).
///
/// Retries and backoff sleeps inside the operation count toward its duration.
pub fn record_flow_duration(kind: FlowKind, elapsed: std::time::Duration) {
	#[cfg(feature = "metrics")]
	{
		metrics::histogram!("secret_broker_flow_duration_seconds", "flow" => kind.as_str())
			.record(elapsed.as_secs_f64());
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, elapsed);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recording_without_a_recorder_is_a_noop() {
		record_flow_outcome(FlowKind::Renew, FlowOutcome::Failure);
		record_flow_duration(FlowKind::Login, std::time::Duration::from_millis(12));
	}
}
