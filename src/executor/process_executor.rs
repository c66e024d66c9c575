use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use tracing::trace;

use super::shell_quote;
use super::CommandExecutor;
use super::CommandOutput;
use super::CommandSpec;
use crate::constants::LOCAL_HOST_LABEL;
use crate::ExecutorConfig;
use crate::LifecycleError;
use crate::Result;

const LOCAL_SHELL: &str = "sh";

/// Runs command lines through `sh -c` locally, or through ssh in batch mode
/// when the [`CommandSpec`] names a host.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    config: ExecutorConfig,
}

impl ProcessExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// The single string handed to the remote shell by ssh.
    pub(crate) fn remote_command_line(spec: &CommandSpec) -> String {
        let mut line = String::new();
        if let Some(dir) = &spec.working_dir {
            line.push_str("cd ");
            line.push_str(&shell_quote(&dir.to_string_lossy()));
            line.push_str(" && ");
        }
        if !spec.env.is_empty() {
            line.push_str("env ");
            for (name, value) in &spec.env {
                line.push_str(&shell_quote(&format!("{name}={value}")));
                line.push(' ');
            }
        }
        line.push_str(LOCAL_SHELL);
        line.push_str(" -c ");
        line.push_str(&shell_quote(&spec.command_line));
        line
    }

    fn build(
        &self,
        spec: &CommandSpec,
    ) -> (&str, Command) {
        match &spec.host {
            Some(host) => {
                let mut command = Command::new(&self.config.ssh_binary);
                command
                    .arg("-o")
                    .arg("BatchMode=yes")
                    .arg("-o")
                    .arg(format!("ConnectTimeout={}", self.config.ssh_connect_timeout_secs))
                    .arg(host)
                    .arg(Self::remote_command_line(spec));
                (self.config.ssh_binary.as_str(), command)
            }
            None => {
                let mut command = Command::new(LOCAL_SHELL);
                command.arg("-c").arg(&spec.command_line).envs(&spec.env);
                if let Some(dir) = &spec.working_dir {
                    command.current_dir(dir);
                }
                (LOCAL_SHELL, command)
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(
        &self,
        spec: CommandSpec,
    ) -> Result<CommandOutput> {
        let target = spec.host.as_deref().unwrap_or(LOCAL_HOST_LABEL).to_string();

        if !spec.is_remote() {
            if let Some(dir) = &spec.working_dir {
                if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
                    return Err(LifecycleError::ExecutionFailure {
                        exit_code: None,
                        output: format!("working directory {} does not exist", dir.display()),
                    }
                    .into());
                }
            }
        }

        let (program, mut command) = self.build(&spec);
        let program = program.to_string();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = spec.timeout.unwrap_or_else(|| self.config.command_timeout());
        trace!(host = %target, command = %spec.command_line, ?timeout, "running command");

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(LifecycleError::ExternalToolMissing(program).into());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                debug!(host = %target, ?timeout, "command timed out");
                return Err(LifecycleError::ConnectionFailure(format!(
                    "{target} did not answer within {timeout:?}"
                ))
                .into());
            }
        };

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };
        trace!(host = %target, exit_code = ?output.exit_code, "command finished");
        Ok(output)
    }
}
