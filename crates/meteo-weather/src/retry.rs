//! Retry utilities for weather requests with exponential backoff and jitter.
//!
//! This module classifies failures of a single attempt:
//! - Timeouts, connection failures and broken exchanges are retried
//! - 5xx server errors are retried
//!
//! It does NOT retry:
//! - 4xx (or any other non-success) statuses
//! - Responses that cannot be parsed

use std::fmt;
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

use crate::types::UpstreamFailure;

/// Default retry configuration
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 600;
pub const DEFAULT_MAX_JITTER_MS: u64 = 350;
pub const DEFAULT_MAX_DELAY_MS: u64 = 4000;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt (doubles each attempt)
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to every delay
    pub max_jitter: Duration,
    /// Cap applied after jitter
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_jitter_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
            max_jitter: Duration::from_millis(max_jitter_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Same policy with a different attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Exponential part of the delay after failed attempt `attempt` (1-based).
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Delay to wait after failed attempt `attempt` (1-based) before the next one.
    ///
    /// `min(base * 2^(attempt-1) + uniform(0, jitter), cap)`, with fresh jitter per call.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = self.sample_jitter();
        self.base_delay_for_attempt(attempt)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(0..=max_ms))
    }
}

/// Classify a reqwest error raised while sending or reading a request.
pub fn classify_error(error: reqwest::Error) -> UpstreamFailure {
    if error.is_timeout() {
        tracing::debug!("Request timed out, will retry");
        return UpstreamFailure::Timeout(error);
    }

    if error.is_connect() {
        tracing::debug!("Connection error, will retry");
        return UpstreamFailure::Connect(error);
    }

    if error.is_decode() {
        return UpstreamFailure::Malformed(error.to_string());
    }

    if let Some(status) = error.status() {
        return match classify_status(status) {
            Some(failure) => failure,
            None => UpstreamFailure::Request(error),
        };
    }

    // Connection reset or incomplete message mid-exchange
    if error.is_request() || error.is_body() {
        tracing::debug!("Exchange broke mid-request, will retry");
        return UpstreamFailure::Protocol(error);
    }

    UpstreamFailure::Request(error)
}

/// Classify a response status. `None` means success.
pub fn classify_status(status: StatusCode) -> Option<UpstreamFailure> {
    if status.is_success() {
        return None;
    }

    if status.is_server_error() {
        tracing::debug!("Server error ({}), will retry", status);
        return Some(UpstreamFailure::ServerStatus(status));
    }

    tracing::debug!("Status {} is not retryable", status);
    Some(UpstreamFailure::Rejected(status))
}

/// A failed attempt that is about to be retried.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// 1-based index of the attempt that failed
    pub attempt: u32,
    pub max_attempts: u32,
    /// Sleep before the next attempt
    pub delay: Duration,
    pub failure: &'a UpstreamFailure,
}

impl fmt::Display for RetryAttempt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt {}/{} failed ({}), retrying in {:.2}s",
            self.attempt,
            self.max_attempts,
            self.failure.kind(),
            self.delay.as_secs_f64()
        )
    }
}
