//! Shell command executor.
//!
//! Runs a script through `/bin/sh -c`, capturing stdout and stderr and
//! propagating the exit code. The child is killed when the job is cancelled
//! or its configured timeout elapses.

use std::{collections::HashMap, process::Stdio, time::Duration};

use oneoff_core::{
    executor::{ExecutionResult, JobExecutor},
    CoreError, Result,
};
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Configuration blob for `shell` jobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellJobConfig {
    /// Script content passed to `/bin/sh -c`. Required.
    pub script: String,

    /// Positional arguments exposed to the script as `$1`, `$2`, ...
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the child.
    #[serde(default)]
    pub workdir: String,

    /// Timeout in seconds; zero means no timeout.
    #[serde(default)]
    pub timeout: u64,
}

/// Executor for the `shell` job type.
#[derive(Debug)]
pub struct ShellExecutor {
    config: ShellJobConfig,
}

impl ShellExecutor {
    /// Parses the config blob into an executor.
    ///
    /// # Errors
    ///
    /// `CoreError::InvalidInput` when the blob is not valid JSON.
    pub fn from_config(config: &str) -> Result<Self> {
        let config: ShellJobConfig = serde_json::from_str(config)
            .map_err(|e| CoreError::invalid_input(format!("invalid shell job config: {e}")))?;
        Ok(Self { config })
    }
}

#[async_trait::async_trait]
impl JobExecutor for ShellExecutor {
    fn type_tag(&self) -> &str {
        "shell"
    }

    fn description(&self) -> String {
        let mut preview = self.config.script.clone();
        if preview.len() > 50 {
            preview.truncate(50);
            preview.push_str("...");
        }
        format!("execute shell command: {preview}")
    }

    fn validate(&self) -> Result<()> {
        if self.config.script.trim().is_empty() {
            return Err(CoreError::invalid_input("script is required"));
        }
        Ok(())
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<ExecutionResult> {
        self.validate()?;

        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(&self.config.script).arg("sh").args(&self.config.args);

        if !self.config.workdir.is_empty() {
            command.current_dir(&self.config.workdir);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        // Dropping the in-flight future must take the child down with it.
        command.kill_on_drop(true);

        let run = command.output();

        let output = if self.config.timeout > 0 {
            let deadline = Duration::from_secs(self.config.timeout);
            tokio::select! {
                output = run => output,
                () = cancel.cancelled() => {
                    return Err(CoreError::Executor("shell command cancelled".into()));
                }
                () = tokio::time::sleep(deadline) => {
                    return Err(CoreError::Executor(format!(
                        "shell command timed out after {}s",
                        self.config.timeout
                    )));
                }
            }
        } else {
            tokio::select! {
                output = run => output,
                () = cancel.cancelled() => {
                    return Err(CoreError::Executor("shell command cancelled".into()));
                }
            }
        };

        let output =
            output.map_err(|e| CoreError::Executor(format!("failed to run shell: {e}")))?;

        let exit_code = i64::from(output.status.code().unwrap_or(-1));
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        let error = if exit_code == 0 {
            String::new()
        } else if stderr.is_empty() {
            format!("command exited with code {exit_code}")
        } else {
            stderr.trim_end().to_string()
        };

        Ok(ExecutionResult { output: stdout, exit_code, error })
    }
}
