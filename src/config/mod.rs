//! Configuration management for the session supervisor.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`MUXKEEPER_CONFIG_PATH`)
//! - Environment variable overrides (`MUXKEEPER__` prefix, highest priority)
//! - Component-wise validation
mod executor;
mod session;
mod supervisor;
pub use executor::*;
pub use session::*;
pub use supervisor::*;


use std::collections::HashSet;
use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_ENV_PREFIX;
use crate::constants::CONFIG_PATH_ENV;
use crate::Error;
use crate::Result;

/// Main configuration container for the supervisor daemon
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `MUXKEEPER_CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct KeeperConfig {
    /// Poll cadence and restart policy tuning
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// How external commands are executed locally and over ssh
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Sessions registered at startup
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
}

impl Debug for KeeperConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("KeeperConfig")
            .field("supervisor", &self.supervisor)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl KeeperConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `MUXKEEPER_CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `MUXKEEPER__` prefix (highest priority)
    ///
    /// # Note
    /// This method does NOT validate the configuration. Callers MUST call `validate()`
    /// before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("MUXKEEPER_CONFIG_PATH", "config/keeper.toml");
    /// std::env::set_var("MUXKEEPER__SUPERVISOR__POLL_INTERVAL_MS", "1000");
    /// let cfg = KeeperConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` from any subsystem, or when two sessions
    /// share a key.
    pub fn validate(self) -> Result<Self> {
        self.supervisor.validate()?;
        self.executor.validate()?;

        let mut keys = HashSet::new();
        for session in &self.sessions {
            session.validate()?;
            if !keys.insert(session.key.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "Duplicate session key {} in sessions",
                    session.key
                )));
            }
        }
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(CONFIG_ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
