//! Scripted executors for exercising the worker pool.
//!
//! `noop-ok` succeeds immediately, `noop-fail` returns whatever outcome its
//! config scripts, `sleep` waits while honouring cancellation, and
//! `always-error` fails before producing a result.

use std::time::Duration;

use oneoff_core::{
    executor::{ExecutionResult, ExecutorRegistry, JobExecutor},
    CoreError, Result,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Executor returning a fixed result.
#[derive(Debug)]
pub struct StaticExecutor {
    tag: &'static str,
    result: ExecutionResult,
}

impl StaticExecutor {
    /// An executor that always succeeds with exit code 0.
    pub fn ok() -> Self {
        Self {
            tag: "noop-ok",
            result: ExecutionResult { output: "ok".into(), exit_code: 0, error: String::new() },
        }
    }

    /// An executor returning the scripted outcome.
    pub fn scripted(result: ExecutionResult) -> Self {
        Self { tag: "noop-fail", result }
    }
}

#[async_trait::async_trait]
impl JobExecutor for StaticExecutor {
    fn type_tag(&self) -> &str {
        self.tag
    }

    fn description(&self) -> String {
        format!("static result with exit code {}", self.result.exit_code)
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _cancel: CancellationToken) -> Result<ExecutionResult> {
        Ok(self.result.clone())
    }
}

#[derive(Debug, Deserialize, Default)]
struct ScriptedConfig {
    #[serde(default)]
    output: String,
    #[serde(default)]
    exit_code: i64,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct SleepConfig {
    millis: u64,
}

/// Executor that sleeps for a configured duration, honouring cancellation.
#[derive(Debug)]
pub struct SleepExecutor {
    millis: u64,
}

#[async_trait::async_trait]
impl JobExecutor for SleepExecutor {
    fn type_tag(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> String {
        format!("sleep for {}ms", self.millis)
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<ExecutionResult> {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(self.millis)) => {
                Ok(ExecutionResult { output: "slept".into(), exit_code: 0, error: String::new() })
            }
            () = cancel.cancelled() => {
                Err(CoreError::Executor("sleep interrupted by cancellation".into()))
            }
        }
    }
}

#[derive(Debug)]
struct AlwaysErrorExecutor;

#[async_trait::async_trait]
impl JobExecutor for AlwaysErrorExecutor {
    fn type_tag(&self) -> &str {
        "always-error"
    }

    fn description(&self) -> String {
        "fails before producing a result".into()
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _cancel: CancellationToken) -> Result<ExecutionResult> {
        Err(CoreError::Executor("executor blew up".into()))
    }
}

/// Registers every scripted executor type on a registry.
pub fn register_test_executors(registry: &mut ExecutorRegistry) {
    registry.register("noop-ok", Box::new(|_config| Ok(Box::new(StaticExecutor::ok()))));

    registry.register(
        "noop-fail",
        Box::new(|config| {
            let cfg: ScriptedConfig = if config.trim().is_empty() {
                ScriptedConfig { exit_code: 1, ..Default::default() }
            } else {
                serde_json::from_str(config)
                    .map_err(|e| CoreError::invalid_input(format!("bad noop-fail config: {e}")))?
            };
            Ok(Box::new(StaticExecutor::scripted(ExecutionResult {
                output: cfg.output,
                exit_code: cfg.exit_code,
                error: cfg.error,
            })))
        }),
    );

    registry.register(
        "sleep",
        Box::new(|config| {
            let cfg: SleepConfig = serde_json::from_str(config)
                .map_err(|e| CoreError::invalid_input(format!("bad sleep config: {e}")))?;
            Ok(Box::new(SleepExecutor { millis: cfg.millis }))
        }),
    );

    registry.register("always-error", Box::new(|_config| Ok(Box::new(AlwaysErrorExecutor))));
}
