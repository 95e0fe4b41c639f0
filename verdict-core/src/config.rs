//! Configuration types

use crate::constants::{
    DEFAULT_AGENT_QUEUE_CAPACITY, DEFAULT_AGENT_WORKERS, DEFAULT_HARVEST_LONG_DELAY_SECS,
    DEFAULT_HARVEST_SHORT_DELAY_MS, DEFAULT_REPORT_CAPACITY, DEFAULT_RESULT_CAPACITY,
    DEFAULT_RULE_PATH, DEFAULT_SEARCH_INTERVAL_SECS, MAX_BATCH,
};
use crate::{ConfigError, VerdictResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// VALIDATION ENGINE
// ============================================================================

/// Configuration for the VM validation coordinator and result harvester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// How often to scan the store for stale VMs (default: 10 minutes)
    pub search_interval: Duration,

    /// Flush the harvest batch once it holds this many results (default: 1024)
    pub max_batch: usize,

    /// Flush delay after a result arrives (default: 1 second)
    pub harvest_short_delay: Duration,

    /// Flush delay while no result is pending (default: 1 hour)
    pub harvest_long_delay: Duration,

    /// Policy rule evaluated for each VM
    pub rule_path: String,

    /// Capacity of the reported-event channel (default: 1024)
    pub report_capacity: usize,

    /// Capacity of the task result channel (default: 1024)
    pub result_capacity: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            search_interval: Duration::from_secs(DEFAULT_SEARCH_INTERVAL_SECS),
            max_batch: MAX_BATCH,
            harvest_short_delay: Duration::from_millis(DEFAULT_HARVEST_SHORT_DELAY_MS),
            harvest_long_delay: Duration::from_secs(DEFAULT_HARVEST_LONG_DELAY_SECS),
            rule_path: DEFAULT_RULE_PATH.to_string(),
            report_capacity: DEFAULT_REPORT_CAPACITY,
            result_capacity: DEFAULT_RESULT_CAPACITY,
        }
    }
}

impl ValidationConfig {
    /// Create ValidationConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VERDICT_SEARCH_INTERVAL_SECS`: Scan interval (default: 600)
    /// - `VERDICT_MAX_BATCH`: Harvest batch cap (default: 1024)
    /// - `VERDICT_HARVEST_SHORT_DELAY_MS`: Flush delay after a result (default: 1000)
    /// - `VERDICT_HARVEST_LONG_DELAY_SECS`: Idle flush delay (default: 3600)
    /// - `VERDICT_RULE_PATH`: Policy rule path
    /// - `VERDICT_REPORT_CAPACITY`: Reported-event channel capacity (default: 1024)
    /// - `VERDICT_RESULT_CAPACITY`: Task result channel capacity (default: 1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            search_interval: env_parse("VERDICT_SEARCH_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.search_interval),
            max_batch: env_parse("VERDICT_MAX_BATCH").unwrap_or(defaults.max_batch),
            harvest_short_delay: env_parse("VERDICT_HARVEST_SHORT_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.harvest_short_delay),
            harvest_long_delay: env_parse("VERDICT_HARVEST_LONG_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.harvest_long_delay),
            rule_path: std::env::var("VERDICT_RULE_PATH").unwrap_or(defaults.rule_path),
            report_capacity: env_parse("VERDICT_REPORT_CAPACITY")
                .unwrap_or(defaults.report_capacity),
            result_capacity: env_parse("VERDICT_RESULT_CAPACITY")
                .unwrap_or(defaults.result_capacity),
        }
    }

    /// Create a configuration for development/testing with short intervals.
    pub fn development() -> Self {
        Self {
            search_interval: Duration::from_secs(5),
            max_batch: 64,
            harvest_short_delay: Duration::from_millis(100),
            harvest_long_delay: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - search_interval and max_batch are non-zero
    /// - harvest_short_delay is non-zero and below harvest_long_delay
    /// - rule_path is an absolute path
    /// - channel capacities are non-zero
    pub fn validate(&self) -> VerdictResult<()> {
        if self.search_interval.is_zero() {
            return Err(invalid(
                "search_interval",
                format!("{:?}", self.search_interval),
                "search_interval must be positive",
            )
            .into());
        }

        if self.max_batch == 0 {
            return Err(
                invalid("max_batch", self.max_batch, "max_batch must be greater than 0").into(),
            );
        }

        if self.harvest_short_delay.is_zero()
            || self.harvest_short_delay >= self.harvest_long_delay
        {
            return Err(invalid(
                "harvest_short_delay",
                format!("{:?}", self.harvest_short_delay),
                "harvest_short_delay must be positive and below harvest_long_delay",
            )
            .into());
        }

        if !self.rule_path.starts_with('/') {
            return Err(invalid(
                "rule_path",
                &self.rule_path,
                "rule_path must be an absolute path",
            )
            .into());
        }

        if self.report_capacity == 0 {
            return Err(invalid(
                "report_capacity",
                self.report_capacity,
                "report_capacity must be greater than 0",
            )
            .into());
        }

        if self.result_capacity == 0 {
            return Err(invalid(
                "result_capacity",
                self.result_capacity,
                "result_capacity must be greater than 0",
            )
            .into());
        }

        Ok(())
    }
}

// ============================================================================
// POLICY AGENT
// ============================================================================

/// Configuration for the worker-pool policy agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Number of concurrent evaluation workers (default: 10)
    pub workers: usize,

    /// Submissions beyond this many queued tasks are rejected (default: 1024)
    pub queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_AGENT_WORKERS,
            queue_capacity: DEFAULT_AGENT_QUEUE_CAPACITY,
        }
    }
}

impl AgentConfig {
    /// Create AgentConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VERDICT_AGENT_WORKERS`: Worker count (default: 10)
    /// - `VERDICT_AGENT_QUEUE_CAPACITY`: Queue capacity (default: 1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: env_parse("VERDICT_AGENT_WORKERS").unwrap_or(defaults.workers),
            queue_capacity: env_parse("VERDICT_AGENT_QUEUE_CAPACITY")
                .unwrap_or(defaults.queue_capacity),
        }
    }

    pub fn validate(&self) -> VerdictResult<()> {
        if self.workers == 0 {
            return Err(invalid("workers", self.workers, "workers must be greater than 0").into());
        }
        if self.queue_capacity == 0 {
            return Err(invalid(
                "queue_capacity",
                self.queue_capacity,
                "queue_capacity must be greater than 0",
            )
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VerdictError;

    #[test]
    fn test_config_default() {
        let config = ValidationConfig::default();
        assert_eq!(
            config.search_interval,
            Duration::from_secs(DEFAULT_SEARCH_INTERVAL_SECS)
        );
        assert_eq!(config.max_batch, MAX_BATCH);
        assert_eq!(config.harvest_short_delay, Duration::from_secs(1));
        assert_eq!(config.harvest_long_delay, Duration::from_secs(3600));
        assert_eq!(config.rule_path, DEFAULT_RULE_PATH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Without environment variables set, should use defaults
        let config = ValidationConfig::from_env();
        assert_eq!(config, ValidationConfig::default());
        assert_eq!(AgentConfig::from_env(), AgentConfig::default());
    }

    #[test]
    fn test_config_development_is_valid() {
        let config = ValidationConfig::development();
        assert_eq!(config.search_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_batch() {
        let config = ValidationConfig {
            max_batch: 0,
            ..ValidationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(VerdictError::Config(ConfigError::InvalidValue { field, .. })) if field == "max_batch"
        ));
    }

    #[test]
    fn test_config_rejects_short_delay_above_long_delay() {
        let config = ValidationConfig {
            harvest_short_delay: Duration::from_secs(7200),
            ..ValidationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(VerdictError::Config(ConfigError::InvalidValue { field, .. })) if field == "harvest_short_delay"
        ));
    }

    #[test]
    fn test_config_rejects_relative_rule_path() {
        let config = ValidationConfig {
            rule_path: "v1/data/validate".to_string(),
            ..ValidationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agent_config_rejects_zero_workers() {
        let config = AgentConfig {
            workers: 0,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(AgentConfig::default().validate().is_ok());
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
