//! Executor configuration.

use std::time::Duration;

use thiserror::Error;

/// Environment variable overriding the per-build time budget, in whole
/// seconds.
pub const BUILD_TIMEOUT_ENV: &str = "GANTRY_BUILD_TIMEOUT_SECS";

const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid GANTRY_BUILD_TIMEOUT_SECS: {0:?} (expected a positive number of seconds)")]
    InvalidTimeout(String),
}

/// Tunables for the build executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock budget for one build, clone and steps included.
    pub build_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            build_timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }
}

impl ExecutorConfig {
    pub fn new(build_timeout: Duration) -> Self {
        Self { build_timeout }
    }

    /// Read configuration from the environment, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_timeout_value(std::env::var(BUILD_TIMEOUT_ENV).ok().as_deref())
    }

    fn from_timeout_value(raw: Option<&str>) -> Result<Self, ConfigError> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        let secs: u64 = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidTimeout(raw.to_string()))?;
        let config = Self::new(Duration::from_secs(secs));
        config.validate()?;
        Ok(config)
    }

    /// Reject budgets that would never let a build run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("0".to_string()));
        }
        Ok(())
    }
}
