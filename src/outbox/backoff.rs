//! Linear backoff between delivery retries

use std::time::Duration;

use rand::Rng;

use crate::config::DeliveryConfig;

/// Linear backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay added per failed attempt in milliseconds
    pub step_ms: u64,
    /// Maximum delay in milliseconds (0 = uncapped)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            step_ms: 500,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }
}

impl From<&DeliveryConfig> for BackoffConfig {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            step_ms: config.backoff_step_ms,
            max_delay_ms: config.backoff_max_ms,
            jitter_factor: config.backoff_jitter.clamp(0.0, 1.0),
        }
    }
}

/// Linear backoff calculator: the wait after failure `n` is `n * step`.
pub struct LinearBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Get the delay to wait after the next failure
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base_delay = self.config.step_ms.saturating_mul(self.attempt as u64) as f64;
        let capped_delay = if self.config.max_delay_ms > 0 {
            base_delay.min(self.config.max_delay_ms as f64)
        } else {
            base_delay
        };

        // Apply jitter only if jitter_factor > 0
        let final_delay = if self.config.jitter_factor > 0.0 && capped_delay > 0.0 {
            let jitter_range = capped_delay * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped_delay + jitter).max(0.0) as u64
        } else {
            capped_delay as u64
        };

        Duration::from_millis(final_delay)
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new()
    }
}
