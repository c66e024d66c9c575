use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// External command execution settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecutorConfig {
    /// Hard timeout applied to every external command (milliseconds)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    /// Passed to ssh as `-o ConnectTimeout=<secs>`
    #[serde(default = "default_ssh_connect_timeout_secs")]
    pub ssh_connect_timeout_secs: u64,

    #[serde(default = "default_tmux_binary")]
    pub tmux_binary: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            ssh_binary: default_ssh_binary(),
            ssh_connect_timeout_secs: default_ssh_connect_timeout_secs(),
            tmux_binary: default_tmux_binary(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_ms == 0 {
            return Err(Error::InvalidConfig("command_timeout_ms cannot be 0".into()));
        }

        if self.ssh_binary.trim().is_empty() {
            return Err(Error::InvalidConfig("ssh_binary cannot be empty".into()));
        }

        if self.tmux_binary.trim().is_empty() {
            return Err(Error::InvalidConfig("tmux_binary cannot be empty".into()));
        }

        // ssh has to give up before the command timeout fires
        if self.ssh_connect_timeout_secs * 1000 >= self.command_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "ssh_connect_timeout_secs {}s should be less than command_timeout_ms {}ms",
                self.ssh_connect_timeout_secs, self.command_timeout_ms
            )));
        }

        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_command_timeout_ms() -> u64 {
    15_000
}
fn default_ssh_binary() -> String {
    "ssh".to_string()
}
fn default_ssh_connect_timeout_secs() -> u64 {
    5
}
fn default_tmux_binary() -> String {
    "tmux".to_string()
}
