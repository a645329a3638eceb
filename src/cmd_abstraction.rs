//! Command execution abstraction for testability.
//!
//! Ban and unban commands are shell snippets from the configuration. They run
//! through a [`CommandExecutor`] so that unit tests can mock command execution
//! without touching the firewall.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[cfg(test)]
use mockall::automock;

const SHELL: &str = "/bin/bash";

/// Output from command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// The exit code, if available
    pub code: Option<i32>,
}

/// Trait for command execution, allowing dependency injection for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a shell command string with extra environment variables.
    ///
    /// Returns `Err` only if the command could not be run at all; a command
    /// that runs and exits non-zero yields `Ok` with `success == false`.
    async fn run(&self, command: &str, env: &[(String, String)]) -> Result<CommandOutput>;
}

/// Runs commands through `/bin/bash -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    timeout: Option<Duration>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str, env: &[(String, String)]) -> Result<CommandOutput> {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c")
            .arg(command)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", SHELL))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| anyhow::anyhow!("Command timed out after {:?}", limit))??,
            None => child.wait_with_output().await?,
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Build an environment list from `(&str, String)` pairs.
pub fn env_vars<I, V>(pairs: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'static str, V)>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect()
}
