//! Configuration module
//!
//! Runner settings for pools, intra-test execution and logging.

mod env;
mod file;

pub use env::EnvOverrides;
pub use file::{ConfigFile, CONFIG_LOCATIONS};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RunnerError, RunnerResult};
use crate::executor::StopOnError;
use crate::pool::PoolConfig;
use crate::testing::RunSettings;
use crate::utils::LogLevel;

/// Runner configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub pool: PoolSettings,
    pub execution: ExecutionSettings,
    pub log_level: LogLevel,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            execution: ExecutionSettings::default(),
            log_level: LogLevel::Info,
        }
    }
}

impl RunnerConfig {
    /// Settings for a pool named `name`
    pub fn pool_config(&self, name: &str) -> RunnerResult<PoolConfig> {
        let heartbeat = seconds("pool.heartbeat_interval_secs", self.pool.heartbeat_interval_secs)?;
        Ok(PoolConfig::new(name)
            .with_size(self.pool.size)
            .with_heartbeat(heartbeat, self.pool.heartbeat_miss_limit)
            .with_task_rerun(self.pool.allow_task_rerun))
    }

    /// Settings handed to every test of a run
    pub fn run_settings(&self) -> RunnerResult<RunSettings> {
        let default_timeout = self
            .execution
            .default_timeout_secs
            .map(|t| seconds("execution.default_timeout_secs", t))
            .transpose()?;
        Ok(RunSettings {
            thread_pool_size: self.execution.thread_pool_size.max(1),
            default_timeout,
            stop_on_error: self.execution.stop_on_error,
            heartbeat_interval: seconds(
                "pool.heartbeat_interval_secs",
                self.pool.heartbeat_interval_secs,
            )?,
            log_level: Some(self.log_level),
            ..Default::default()
        })
    }
}

/// Whether `secs` is a usable positive duration
pub(crate) fn is_positive_secs(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}

fn seconds(field: &str, secs: f64) -> RunnerResult<Duration> {
    if !is_positive_secs(secs) {
        return Err(RunnerError::Config(format!(
            "{field} must be a positive number of seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| RunnerError::Config(format!("{field}: {e}")))
}

/// Worker pool settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Workers in the default pool
    pub size: usize,
    pub heartbeat_interval_secs: f64,
    pub heartbeat_miss_limit: u32,
    pub allow_task_rerun: bool,
    /// Rerun budget given to scheduled tasks
    pub rerun: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 4,
            heartbeat_interval_secs: 5.0,
            heartbeat_miss_limit: 3,
            allow_task_rerun: true,
            rerun: 0,
        }
    }
}

/// Intra-test execution settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Concurrent testcases per execution group
    pub thread_pool_size: usize,
    pub default_timeout_secs: Option<f64>,
    pub stop_on_error: StopOnError,
    /// Merge part fragments into one report per test
    pub merge_parts: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            thread_pool_size: 4,
            default_timeout_secs: None,
            stop_on_error: StopOnError::Off,
            merge_parts: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.pool.size, 4);
        assert_eq!(config.pool.heartbeat_miss_limit, 3);
        assert!(config.execution.merge_parts);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_derived_settings() {
        let mut config = RunnerConfig::default();
        config.pool.size = 2;
        config.pool.heartbeat_interval_secs = 0.5;
        config.execution.default_timeout_secs = Some(1.5);
        config.execution.stop_on_error = StopOnError::Suite;

        let pool = config.pool_config("fast").unwrap();
        assert_eq!(pool.name, "fast");
        assert_eq!(pool.size, 2);
        assert_eq!(pool.heartbeat_window(), Duration::from_millis(1500));

        let settings = config.run_settings().unwrap();
        assert_eq!(settings.default_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(settings.stop_on_error, StopOnError::Suite);
        assert_eq!(settings.heartbeat_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_bad_seconds_are_errors() {
        for bad in [-1.0, 0.0, f64::NAN, f64::INFINITY] {
            let mut config = RunnerConfig::default();
            config.execution.default_timeout_secs = Some(bad);
            let err = config.run_settings().unwrap_err();
            assert!(matches!(err, RunnerError::Config(_)), "{bad}: {err}");
            assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

            let mut config = RunnerConfig::default();
            config.pool.heartbeat_interval_secs = bad;
            assert!(config.pool_config("p").is_err());
            assert!(config.run_settings().is_err());
        }
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: RunnerConfig = serde_yaml::from_str("pool:\n  size: 8\n").unwrap();
        assert_eq!(config.pool.size, 8);
        assert_eq!(config.pool.heartbeat_miss_limit, 3);
        assert_eq!(config.execution, ExecutionSettings::default());
    }
}
