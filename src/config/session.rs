use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Immutable description of one supervised process.
///
/// The key doubles as the multiplexer session name, so it is restricted to
/// ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub key: String,

    /// Shell command line run inside the session
    pub command: String,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Remote host reached over ssh; `None` runs locally
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub auto_restart: AutoRestartConfig,

    /// Start this session when the daemon boots
    #[serde(default)]
    pub start_on_launch: bool,
}

impl SessionConfig {
    pub fn new(
        key: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            command: command.into(),
            working_dir: None,
            host: None,
            env: BTreeMap::new(),
            auto_restart: AutoRestartConfig::default(),
            start_on_launch: false,
        }
    }

    pub fn with_host(
        mut self,
        host: impl Into<String>,
    ) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_auto_restart(
        mut self,
        auto_restart: AutoRestartConfig,
    ) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_key(&self.key)?;

        if self.command.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "session {}: command cannot be empty",
                self.key
            )));
        }

        if let Some(host) = &self.host {
            if host.trim().is_empty() || host.starts_with('-') {
                return Err(Error::InvalidConfig(format!(
                    "session {}: invalid host {:?}",
                    self.key, host
                )));
            }
        }

        for name in self.env.keys() {
            let valid = !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(Error::InvalidConfig(format!(
                    "session {}: invalid environment variable name {:?}",
                    self.key, name
                )));
            }
        }

        self.auto_restart.validate(&self.key)
    }
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidConfig("session key cannot be empty".into()));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::InvalidConfig(format!(
            "session key {:?} may only contain [A-Za-z0-9_-]",
            key
        )));
    }
    Ok(())
}

/// Auto-restart parameters for one session
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AutoRestartConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Consecutive crashes tolerated before restarts are paused (>= 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for AutoRestartConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl AutoRestartConfig {
    pub fn enabled(
        max_retries: u32,
        retry_delay_secs: u64,
    ) -> Self {
        Self {
            enabled: true,
            max_retries,
            retry_delay_secs,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    fn validate(
        &self,
        key: &str,
    ) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig(format!(
                "session {}: auto_restart.max_retries must be >= 1",
                key
            )));
        }
        Ok(())
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}
