// self
use crate::{_prelude::*, client::Method, obs::OpKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// A span builder used by client operations.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Creates a new span tagged with the provided operation kind + stage.
	pub fn new(kind: OpKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("api_client_core.op", op = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
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
}

/// Logs a scheduled retry.
pub fn record_retry(request_id: &str, method: Method, attempt: u32, delay: Duration, err: &Error) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(
			request_id,
			method = method.as_str(),
			attempt,
			delay_ms = delay.whole_milliseconds() as u64,
			error = %err,
			"retrying request"
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (request_id, method, attempt, delay, err);
	}
}

/// Logs a persistence failure that was swallowed so token use can continue.
pub fn record_storage_failure(operation: &'static str, err: &crate::store::StorageError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(operation, error = %err, "credential storage failure ignored");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (operation, err);
	}
}

/// Logs the end of a refresh cycle.
pub fn record_refresh_result(cycle: u64, result: Result<(), &crate::error::RefreshError>) {
	#[cfg(feature = "tracing")]
	{
		match result {
			Ok(()) => tracing::info!(cycle, "credential refresh succeeded"),
			Err(err) => tracing::warn!(cycle, error = %err, "credential refresh failed"),
		}
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (cycle, result);
	}
}

/// Logs a cancelled request.
pub fn record_cancellation(request_id: &str) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(request_id, "request cancelled");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = request_id;
	}
}

/// Logs why an auto-refresh timer was not armed.
pub fn record_timer_skipped(reason: &'static str) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(reason, "auto-refresh timer not scheduled");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = reason;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn helpers_noop_without_tracing() {
		let err = Error::ConcurrencyLimit { limit: 1 };

		record_retry("req-1", Method::Get, 1, Duration::milliseconds(100), &err);
		record_cancellation("req-1");
		record_timer_skipped("no runtime");
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = OpSpan::new(OpKind::Refresh, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
