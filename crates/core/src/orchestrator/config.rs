//! Retry policy for the pipeline orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::ErrorKind;

/// Backoff between attempts of a retryable stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Extra factor applied when a stage reports resource exhaustion.
    #[serde(default = "default_resource_exhausted_multiplier")]
    pub resource_exhausted_multiplier: f64,
}

fn default_initial_delay() -> u64 {
    1000 // 1 second
}

fn default_max_delay() -> u64 {
    60_000 // 1 minute
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_resource_exhausted_multiplier() -> f64 {
    4.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            resource_exhausted_multiplier: default_resource_exhausted_multiplier(),
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Delay before retry number `retry` (1-based) after a failure of `kind`.
    pub fn delay_for(&self, retry: u32, kind: ErrorKind) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let mut delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        if kind == ErrorKind::ResourceExhausted {
            delay *= self.resource_exhausted_multiplier;
        }
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.initial_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 60_000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.resource_exhausted_multiplier, 4.0);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::default().with_max_delay_ms(5000);
        assert_eq!(config.delay_for(1, ErrorKind::Transient), Duration::from_millis(1000));
        assert_eq!(config.delay_for(2, ErrorKind::Transient), Duration::from_millis(2000));
        assert_eq!(config.delay_for(3, ErrorKind::Transient), Duration::from_millis(4000));
        assert_eq!(config.delay_for(4, ErrorKind::Transient), Duration::from_millis(5000));
        assert_eq!(config.delay_for(500, ErrorKind::Transient), Duration::from_millis(5000));
    }

    #[test]
    fn test_resource_exhausted_waits_longer() {
        let config = RetryConfig::default();
        assert_eq!(
            config.delay_for(1, ErrorKind::ResourceExhausted),
            Duration::from_millis(4000)
        );
        assert_eq!(
            config.delay_for(5, ErrorKind::ResourceExhausted),
            Duration::from_millis(60_000)
        );
    }

    #[test]
    fn test_immediate() {
        let config = RetryConfig::immediate();
        assert_eq!(config.delay_for(3, ErrorKind::ResourceExhausted), Duration::ZERO);
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            initial_delay_ms = 250
        "#;
        let config: RetryConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.initial_delay_ms, 250);
        assert_eq!(config.max_delay_ms, 60_000);
    }
}
