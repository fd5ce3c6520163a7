//! Environment variable configuration
//!
//! `PLAN_RUNNER_*` variables override values from the config file.

use std::env;
use tracing::warn;

use super::{is_positive_secs, RunnerConfig};
use crate::executor::StopOnError;
use crate::utils::LogLevel;

/// Environment variable prefix
const ENV_PREFIX: &str = "PLAN_RUNNER";

/// Overrides read from the environment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvOverrides {
    /// PLAN_RUNNER_WORKERS
    pub workers: Option<usize>,
    /// PLAN_RUNNER_TIMEOUT, seconds
    pub timeout: Option<f64>,
    /// PLAN_RUNNER_STOP_ON_ERROR
    pub stop_on_error: Option<StopOnError>,
    /// PLAN_RUNNER_LOG
    pub log_level: Option<LogLevel>,
    /// PLAN_RUNNER_CONFIG
    pub config_file: Option<String>,
}

impl EnvOverrides {
    pub fn load() -> Self {
        Self {
            workers: get_env_parse("WORKERS"),
            timeout: get_env_parse::<f64>("TIMEOUT").filter(|t| {
                if !is_positive_secs(*t) {
                    warn!("Ignoring {}_TIMEOUT={}", ENV_PREFIX, t);
                }
                is_positive_secs(*t)
            }),
            stop_on_error: get_env("STOP_ON_ERROR").and_then(|v| {
                let parsed = StopOnError::from_str(&v);
                if parsed.is_none() {
                    warn!("Ignoring {}_STOP_ON_ERROR={}", ENV_PREFIX, v);
                }
                parsed
            }),
            log_level: get_env("LOG").and_then(|v| LogLevel::from_str(&v)),
            config_file: get_env("CONFIG"),
        }
    }

    pub fn has_any(&self) -> bool {
        self.workers.is_some()
            || self.timeout.is_some()
            || self.stop_on_error.is_some()
            || self.log_level.is_some()
            || self.config_file.is_some()
    }

    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(workers) = self.workers {
            config.pool.size = workers.max(1);
        }
        match self.timeout {
            Some(timeout) if is_positive_secs(timeout) => {
                config.execution.default_timeout_secs = Some(timeout);
            }
            Some(timeout) => warn!("Ignoring timeout override {}", timeout),
            None => {}
        }
        if let Some(stop_on_error) = self.stop_on_error {
            config.execution.stop_on_error = stop_on_error;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}
