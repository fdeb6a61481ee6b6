//! Retry Policy
//!
//! Cool-down between a failed poller start (or a failed page fetch) and the
//! next start. Defaults to a fixed 30 second wait with unlimited attempts;
//! a multiplier above 1.0 turns it into exponential backoff capped at
//! `max_delay`, and a jitter factor spreads restarts of many pollers.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::PollingSettings;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first restart.
    pub initial_delay: Duration,
    /// Maximum delay between restarts.
    pub max_delay: Duration,
    /// Multiplier applied after each consecutive failure (1.0 = fixed).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of consecutive restarts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }
}

impl RetryConfig {
    /// Fixed delay, no jitter, unlimited attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }
}

impl From<&PollingSettings> for RetryConfig {
    fn from(settings: &PollingSettings) -> Self {
        Self {
            initial_delay: settings.retry_interval,
            max_delay: settings.retry_max.max(settings.retry_interval),
            multiplier: sanitize_multiplier(settings.retry_multiplier),
            jitter_factor: sanitize_jitter(settings.retry_jitter),
            max_attempts: 0,
        }
    }
}

/// Multipliers must be finite and at least 1.0; anything else is fixed.
fn sanitize_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    }
}

/// Jitter is a fraction in `[0, 1]`; non-finite values disable it.
fn sanitize_jitter(jitter: f64) -> f64 {
    if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Retry policy with optional backoff and jitter.
///
/// # Example
///
/// ```rust
/// use livechat_stream_proxy::infrastructure::poller::{RetryConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let mut policy = RetryPolicy::new(RetryConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(30)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(30)));
///
/// // A successful start clears the streak.
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl RetryPolicy {
    /// Create a new retry policy.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next restart.
    ///
    /// Returns `None` once `max_attempts` consecutive restarts have been used.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_nan() || scaled <= 0.0 {
            self.current_delay.as_millis()
        } else if scaled.is_finite() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            self.config.max_delay.as_millis()
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Clear the failure streak after a successful start.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Consecutive restarts so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another restart is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        let factor = sanitize_jitter(self.config.jitter_factor);
        if factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
