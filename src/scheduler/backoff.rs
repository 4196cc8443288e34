//! Retry delays for dispatch jobs

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Exponential backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff calculator with jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_delay_ms: u64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms;
        Self {
            config,
            current_delay_ms: initial,
            attempt: 0,
        }
    }

    /// Get the next delay duration.
    ///
    /// The first call yields the initial delay; every later call grows the
    /// previous one by the multiplier, capped at the maximum.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base_delay = if self.attempt == 1 {
            self.config.initial_delay_ms as f64
        } else {
            self.current_delay_ms as f64 * self.config.multiplier
        };
        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        let final_delay = if self.config.jitter_factor > 0.0 && capped_delay > 0.0 {
            let jitter_range = capped_delay * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped_delay + jitter).max(1.0) as u64
        } else {
            capped_delay.max(0.0) as u64
        };

        // Grow from the un-jittered value so jitter does not compound
        self.current_delay_ms = capped_delay as u64;

        Duration::from_millis(final_delay)
    }

    pub fn reset(&mut self) {
        self.current_delay_ms = self.config.initial_delay_ms;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// How a failed job waits before its next attempt
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Same delay before every retry
    Fixed(Duration),
    Exponential(BackoffConfig),
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential(BackoffConfig::default())
    }
}

impl Backoff {
    /// Per-job delay state
    pub(crate) fn start(&self) -> RetryDelay {
        match self {
            Backoff::None => RetryDelay::Fixed(Duration::ZERO),
            Backoff::Fixed(delay) => RetryDelay::Fixed(*delay),
            Backoff::Exponential(config) => {
                RetryDelay::Exponential(ExponentialBackoff::with_config(config.clone()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum RetryDelay {
    Fixed(Duration),
    Exponential(ExponentialBackoff),
}

impl RetryDelay {
    pub(crate) fn next_delay(&mut self) -> Duration {
        match self {
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::Exponential(backoff) => backoff.next_delay(),
        }
    }
}
