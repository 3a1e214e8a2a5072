//! Exponential backoff for rate-limited requests.

use rand::Rng;
use std::time::Duration;

use pubrag_core::config::LlmSettings;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// ±10% random spread on each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_backoff_ms),
            max_delay: Duration::from_millis(settings.max_backoff_ms),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt + 1`. A server-provided
    /// `Retry-After` replaces the computed delay but is still capped.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(after) = retry_after {
            return after.min(self.max_delay);
        }
        let base = self.initial_delay.as_secs_f64();
        let exp = base * self.backoff_multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let mut delay = Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()).max(0.0));
        if self.jitter {
            let range = delay.as_secs_f64() * 0.1;
            if range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-range..range);
                delay = Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0));
            }
        }
        delay
    }
}
