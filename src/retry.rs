//! Retry policy: a pure decision function plus the configuration it reads.
//!
//! [`should_retry`] never sleeps and never performs I/O; the request coordinator owns the
//! attempt loop and only asks this module whether, and after how long, to try again.
//! Attempt indices are 1-based and attempt 1 is the original call, so a request makes at
//! most `1 + max_retries` transport calls.

// std
use std::collections::BTreeSet;
// self
use crate::{_prelude::*, client::Method, error::ConfigError};

/// Upper bound applied to any computed delay so float growth cannot overflow.
const DELAY_CEILING_MS: f64 = 24.0 * 60.0 * 60.0 * 1_000.0;

/// Process-wide retry settings.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
	/// Retries allowed after the original call.
	pub max_retries: u32,
	/// Delay before the first retry (and every retry when backoff is constant).
	pub base_delay: Duration,
	/// Growth factor applied per attempt when exponential backoff is enabled.
	pub backoff_multiplier: f64,
	/// Statuses that qualify for a retry.
	pub retryable_statuses: BTreeSet<u16>,
	/// Methods that may be retried at all.
	pub retryable_methods: BTreeSet<Method>,
	/// Exponential (`true`) or constant (`false`) backoff.
	pub exponential_backoff: bool,
	/// Cap applied to every computed delay.
	pub max_delay: Option<Duration>,
	/// Raise the delay to the server's `Retry-After` hint when one is present.
	pub respect_retry_after: bool,
	/// Longest `Retry-After` hint honored; longer hints are clamped to this value.
	pub max_retry_after: Duration,
}
impl RetryConfig {
	/// Default number of retries.
	pub const DEFAULT_MAX_RETRIES: u32 = 3;
	/// Default base delay.
	pub const DEFAULT_BASE_DELAY: Duration = Duration::seconds(1);
	/// Default backoff multiplier.
	pub const DEFAULT_MULTIPLIER: f64 = 2.0;
	/// Statuses retried by default.
	pub const DEFAULT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];
	/// Methods retried by default; `POST` and `PATCH` are not idempotent.
	pub const DEFAULT_METHODS: [Method; 5] =
		[Method::Get, Method::Head, Method::Options, Method::Put, Method::Delete];
	/// Default ceiling for `Retry-After` hints.
	pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::seconds(60);

	/// Returns a config that never retries.
	pub fn disabled() -> Self {
		Self { max_retries: 0, ..Self::default() }
	}

	/// Sets the retry budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;

		self
	}

	/// Sets the base delay.
	pub fn with_base_delay(mut self, delay: Duration) -> Self {
		self.base_delay = delay;

		self
	}

	/// Sets the backoff multiplier.
	pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
		self.backoff_multiplier = multiplier;

		self
	}

	/// Chooses exponential or constant backoff.
	pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
		self.exponential_backoff = enabled;

		self
	}

	/// Replaces the retryable status set.
	pub fn with_retryable_statuses<I>(mut self, statuses: I) -> Self
	where
		I: IntoIterator<Item = u16>,
	{
		self.retryable_statuses = statuses.into_iter().collect();

		self
	}

	/// Replaces the retryable method set.
	pub fn with_retryable_methods<I>(mut self, methods: I) -> Self
	where
		I: IntoIterator<Item = Method>,
	{
		self.retryable_methods = methods.into_iter().collect();

		self
	}

	/// Caps every computed delay.
	pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
		self.max_delay = Some(max_delay);

		self
	}

	/// Enables or disables honoring `Retry-After`.
	pub fn with_respect_retry_after(mut self, enabled: bool) -> Self {
		self.respect_retry_after = enabled;

		self
	}

	/// Sets the longest `Retry-After` hint honored.
	pub fn with_max_retry_after(mut self, limit: Duration) -> Self {
		self.max_retry_after = limit;

		self
	}

	/// Returns a copy with every field set in `overrides` replaced.
	pub fn merged(&self, overrides: &RetryOverride) -> Self {
		Self {
			max_retries: overrides.max_retries.unwrap_or(self.max_retries),
			base_delay: overrides.base_delay.unwrap_or(self.base_delay),
			backoff_multiplier: overrides.backoff_multiplier.unwrap_or(self.backoff_multiplier),
			retryable_statuses: overrides
				.retryable_statuses
				.clone()
				.unwrap_or_else(|| self.retryable_statuses.clone()),
			retryable_methods: overrides
				.retryable_methods
				.clone()
				.unwrap_or_else(|| self.retryable_methods.clone()),
			exponential_backoff: overrides.exponential_backoff.unwrap_or(self.exponential_backoff),
			max_delay: overrides.max_delay.or(self.max_delay),
			respect_retry_after: overrides.respect_retry_after.unwrap_or(self.respect_retry_after),
			max_retry_after: self.max_retry_after,
		}
	}

	/// Checks numeric ranges.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !self.base_delay.is_positive() {
			return Err(ConfigError::InvalidRetry { reason: "base delay must be positive" });
		}
		if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
			return Err(ConfigError::InvalidRetry {
				reason: "backoff multiplier must be a finite number of at least 1",
			});
		}
		if self.max_delay.is_some_and(|cap| cap.is_negative()) {
			return Err(ConfigError::InvalidRetry { reason: "max delay must not be negative" });
		}
		if self.max_retry_after.is_negative() {
			return Err(ConfigError::InvalidRetry {
				reason: "max Retry-After must not be negative",
			});
		}

		Ok(())
	}

	/// Computes the delay to wait after failed attempt `attempt` (1-based).
	pub fn backoff_delay(&self, attempt: u32) -> Duration {
		let base_ms = self.base_delay.whole_milliseconds() as f64;
		let raw_ms = if self.exponential_backoff {
			let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);

			base_ms * self.backoff_multiplier.powi(exponent)
		} else {
			base_ms
		};
		let delay = Duration::milliseconds(raw_ms.clamp(0.0, DELAY_CEILING_MS).round() as i64);

		self.cap(delay)
	}

	fn cap(&self, delay: Duration) -> Duration {
		let delay = match self.max_delay {
			Some(cap) if delay > cap => cap,
			_ => delay,
		};

		delay.max(Duration::ZERO)
	}
}
impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: Self::DEFAULT_MAX_RETRIES,
			base_delay: Self::DEFAULT_BASE_DELAY,
			backoff_multiplier: Self::DEFAULT_MULTIPLIER,
			retryable_statuses: Self::DEFAULT_STATUSES.into_iter().collect(),
			retryable_methods: Self::DEFAULT_METHODS.into_iter().collect(),
			exponential_backoff: true,
			max_delay: None,
			respect_retry_after: true,
			max_retry_after: Self::DEFAULT_MAX_RETRY_AFTER,
		}
	}
}

/// Per-request retry overrides; unset fields fall back to the client default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetryOverride {
	/// Overrides [`RetryConfig::max_retries`].
	pub max_retries: Option<u32>,
	/// Overrides [`RetryConfig::base_delay`].
	pub base_delay: Option<Duration>,
	/// Overrides [`RetryConfig::backoff_multiplier`].
	pub backoff_multiplier: Option<f64>,
	/// Overrides [`RetryConfig::retryable_statuses`].
	pub retryable_statuses: Option<BTreeSet<u16>>,
	/// Overrides [`RetryConfig::retryable_methods`].
	pub retryable_methods: Option<BTreeSet<Method>>,
	/// Overrides [`RetryConfig::exponential_backoff`].
	pub exponential_backoff: Option<bool>,
	/// Overrides [`RetryConfig::max_delay`].
	pub max_delay: Option<Duration>,
	/// Overrides [`RetryConfig::respect_retry_after`].
	pub respect_retry_after: Option<bool>,
}
impl RetryOverride {
	/// Overrides the retry budget.
	pub fn max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = Some(max_retries);

		self
	}

	/// Overrides the base delay.
	pub fn base_delay(mut self, delay: Duration) -> Self {
		self.base_delay = Some(delay);

		self
	}

	/// Overrides the retryable method set.
	pub fn retryable_methods<I>(mut self, methods: I) -> Self
	where
		I: IntoIterator<Item = Method>,
	{
		self.retryable_methods = Some(methods.into_iter().collect());

		self
	}
}

/// Why [`should_retry`] refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
	/// The error kind is never retried.
	NonRetryableError,
	/// The retry budget is spent.
	Exhausted,
	/// The method is not retryable.
	MethodNotRetryable,
	/// The status is not in the retryable set.
	StatusNotRetryable,
}

/// Outcome of [`should_retry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
	/// Wait `delay`, then send attempt `attempt + 1`.
	Retry {
		/// Time to wait before the next attempt.
		delay: Duration,
	},
	/// Surface the error.
	Stop(StopReason),
}
impl RetryDecision {
	/// Returns the delay when the decision is to retry.
	pub fn delay(self) -> Option<Duration> {
		match self {
			RetryDecision::Retry { delay } => Some(delay),
			RetryDecision::Stop(_) => None,
		}
	}
}

/// Decides whether failed attempt `attempt` (1-based) of a `method` request should be retried.
///
/// Rules apply in order: terminal error kinds stop; a spent budget stops; non-retryable
/// methods stop; listed statuses retry; status-less transport failures retry; anything else
/// stops.
pub fn should_retry(error: &Error, method: Method, attempt: u32, config: &RetryConfig) -> RetryDecision {
	if error.is_terminal() {
		return RetryDecision::Stop(StopReason::NonRetryableError);
	}
	if attempt > config.max_retries {
		return RetryDecision::Stop(StopReason::Exhausted);
	}
	if !config.retryable_methods.contains(&method) {
		return RetryDecision::Stop(StopReason::MethodNotRetryable);
	}

	let eligible = match error {
		Error::Transport(_) => true,
		_ => error.status().is_some_and(|status| config.retryable_statuses.contains(&status)),
	};

	if !eligible {
		return RetryDecision::Stop(StopReason::StatusNotRetryable);
	}

	let mut delay = config.backoff_delay(attempt);

	if config.respect_retry_after {
		if let Some(hint) = error.retry_after() {
			delay = config.cap(delay.max(hint.min(config.max_retry_after)));
		}
	}

	RetryDecision::Retry { delay }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::{ParseError, TransportError};

	fn network() -> Error {
		TransportError::Io(std::io::Error::other("connection reset")).into()
	}

	fn status(status: u16) -> Error {
		Error::HttpStatus { status, retry_after: None, body_preview: None }
	}

	fn example_config() -> RetryConfig {
		RetryConfig::default()
			.with_max_retries(3)
			.with_base_delay(Duration::milliseconds(100))
			.with_backoff_multiplier(2.0)
			.with_exponential_backoff(true)
	}

	#[test]
	fn exponential_delays_double_per_attempt() {
		let config = example_config();
		let delays = (1..=3)
			.map(|attempt| should_retry(&network(), Method::Get, attempt, &config).delay())
			.collect::<Vec<_>>();

		assert_eq!(
			delays,
			vec![
				Some(Duration::milliseconds(100)),
				Some(Duration::milliseconds(200)),
				Some(Duration::milliseconds(400)),
			]
		);
		assert_eq!(
			should_retry(&network(), Method::Get, 4, &config),
			RetryDecision::Stop(StopReason::Exhausted)
		);
	}

	#[test]
	fn constant_backoff_repeats_base_delay() {
		let config = example_config().with_exponential_backoff(false);

		for attempt in 1..=3 {
			assert_eq!(
				should_retry(&status(503), Method::Get, attempt, &config).delay(),
				Some(Duration::milliseconds(100))
			);
		}
	}

	#[test]
	fn post_is_not_retried_by_default() {
		assert_eq!(
			should_retry(&network(), Method::Post, 1, &example_config()),
			RetryDecision::Stop(StopReason::MethodNotRetryable)
		);
	}

	#[test]
	fn only_listed_statuses_are_retried() {
		let config = example_config();

		for code in RetryConfig::DEFAULT_STATUSES {
			assert!(should_retry(&status(code), Method::Put, 1, &config).delay().is_some());
		}
		for code in [400, 403, 404, 409, 422, 501] {
			assert_eq!(
				should_retry(&status(code), Method::Get, 1, &config),
				RetryDecision::Stop(StopReason::StatusNotRetryable)
			);
		}
		assert_eq!(
			should_retry(&Error::AuthExpired { url: "u".into() }, Method::Get, 1, &config),
			RetryDecision::Stop(StopReason::StatusNotRetryable)
		);
	}

	#[test]
	fn terminal_errors_win_over_everything() {
		let parse = Error::Parse(ParseError::Json {
			source: serde_path_to_error::deserialize::<_, u8>(
				&mut serde_json::Deserializer::from_str("\"x\""),
			)
			.expect_err("A string is not a u8."),
			status: Some(503),
		});

		assert_eq!(
			should_retry(&parse, Method::Get, 1, &example_config()),
			RetryDecision::Stop(StopReason::NonRetryableError)
		);
		assert_eq!(
			should_retry(
				&Error::Cancelled { request_id: "r".into() },
				Method::Get,
				1,
				&example_config()
			),
			RetryDecision::Stop(StopReason::NonRetryableError)
		);
	}

	#[test]
	fn retry_after_hint_is_clamped() {
		let throttled = Error::HttpStatus {
			status: 503,
			retry_after: Some(Duration::seconds(86_400_000)),
			body_preview: None,
		};
		let config = example_config();

		assert_eq!(
			should_retry(&throttled, Method::Get, 1, &config).delay(),
			Some(RetryConfig::DEFAULT_MAX_RETRY_AFTER)
		);
		assert_eq!(
			should_retry(&throttled, Method::Get, 1, &config.clone().with_max_delay(Duration::seconds(5)))
				.delay(),
			Some(Duration::seconds(5))
		);
		assert_eq!(
			should_retry(&throttled, Method::Get, 1, &config.with_respect_retry_after(false)).delay(),
			Some(Duration::milliseconds(100))
		);
	}

	#[test]
	fn negative_cap_yields_zero_delay() {
		let config = RetryConfig { max_delay: Some(Duration::seconds(-5)), ..example_config() };

		assert_eq!(should_retry(&network(), Method::Get, 1, &config).delay(), Some(Duration::ZERO));
	}

	#[test]
	fn zero_budget_never_retries() {
		assert_eq!(
			should_retry(&network(), Method::Get, 1, &RetryConfig::disabled()),
			RetryDecision::Stop(StopReason::Exhausted)
		);
	}

	#[test]
	fn retry_after_raises_delay_within_cap() {
		let throttled = Error::HttpStatus {
			status: 429,
			retry_after: Some(Duration::seconds(2)),
			body_preview: None,
		};
		let config = example_config();

		assert_eq!(
			should_retry(&throttled, Method::Get, 1, &config).delay(),
			Some(Duration::seconds(2))
		);
		assert_eq!(
			should_retry(&throttled, Method::Get, 1, &config.clone().with_max_delay(Duration::seconds(1)))
				.delay(),
			Some(Duration::seconds(1))
		);
		assert_eq!(
			should_retry(&throttled, Method::Get, 1, &config.with_respect_retry_after(false)).delay(),
			Some(Duration::milliseconds(100))
		);
	}

	#[test]
	fn overrides_merge_field_by_field() {
		let merged = example_config().merged(
			&RetryOverride::default().max_retries(1).retryable_methods([Method::Post]),
		);

		assert_eq!(merged.max_retries, 1);
		assert_eq!(merged.base_delay, Duration::milliseconds(100));
		assert!(merged.retryable_methods.contains(&Method::Post));
		assert!(!merged.retryable_methods.contains(&Method::Get));
	}

	#[test]
	fn validation_rejects_bad_ranges() {
		assert!(RetryConfig::default().validate().is_ok());
		assert!(RetryConfig::default().with_base_delay(Duration::ZERO).validate().is_err());
		assert!(RetryConfig::default().with_backoff_multiplier(0.5).validate().is_err());
		assert!(RetryConfig::default().with_backoff_multiplier(f64::NAN).validate().is_err());
	}

	#[test]
	fn huge_attempts_saturate_instead_of_overflowing() {
		let config = example_config().with_max_retries(u32::MAX);
		let delay = config.backoff_delay(10_000);

		assert_eq!(delay, Duration::milliseconds(DELAY_CEILING_MS as i64));
	}
}
