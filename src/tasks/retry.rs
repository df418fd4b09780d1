//! Retry backoff schedule

use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryStrategy {
    /// `base * 2^(n-1)`
    #[default]
    Exponential,
    /// `base * n`
    Linear,
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" => Ok(RetryStrategy::Exponential),
            "linear" => Ok(RetryStrategy::Linear),
            other => Err(format!("unknown retry strategy: {}", other)),
        }
    }
}

/// Delay before retry attempt `n`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            base: Duration::from_secs(1),
            max: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the `attempt`-th retry (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let n = attempt.max(1);
        let delay = match self.strategy {
            RetryStrategy::Exponential => {
                let factor = 2u32.checked_pow(n - 1).unwrap_or(u32::MAX);
                self.base.saturating_mul(factor)
            }
            RetryStrategy::Linear => self.base.saturating_mul(n),
        };
        delay.min(self.max)
    }
}
