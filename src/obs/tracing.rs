//! Tracing spans for broker operations.

// self
use crate::{
	_prelude::*,
	obs::{FlowKind, FlowOutcome},
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// Span wrapping one broker operation.
///
/// The span opens with `flow` and `stage` set; `outcome` and `elapsed_ms` are filled in by
/// [`finish`](Self::finish) once the operation resolves.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Opens a span for `kind` at call site `stage`.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"secret_broker.flow",
				flow = kind.as_str(),
				stage,
				outcome = tracing::field::Empty,
				elapsed_ms = tracing::field::Empty,
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}

	/// Records how the operation ended.
	pub fn finish(&self, outcome: FlowOutcome, elapsed: std::time::Duration) {
		#[cfg(feature = "tracing")]
		{
			let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

			self.span.record("outcome", outcome.as_str());
			self.span.record("elapsed_ms", elapsed_ms);
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (outcome, elapsed);
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn instrument_passes_output_through() {
		let span = FlowSpan::new(FlowKind::Fetch, "instrument_passes_output_through");
		let value = span.instrument(async { 42 }).await;

		span.finish(FlowOutcome::Success, std::time::Duration::from_millis(3));

		assert_eq!(value, 42);
	}
}
