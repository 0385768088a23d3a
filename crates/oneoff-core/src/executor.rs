//! Executor abstraction: what the engine requires from every job type.
//!
//! The core never knows what a job *does*; it resolves the job's type tag
//! through a registry of factories and drives the resulting executor with a
//! cancellation token. Executors must honour the token during long waits.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};

/// Result of a finished executor run.
///
/// `exit_code == 0` means success; any other value is a failure with the
/// given output and error preserved on the execution row.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Captured output (stdout, response body, ...).
    pub output: String,

    /// Exit code. Zero is success.
    pub exit_code: i64,

    /// Error description accompanying a non-zero exit code.
    pub error: String,
}

/// A runnable job type.
///
/// `execute` may block for seconds to hours and must observe the token:
/// returning an error while the token is cancelled is recorded as a
/// cancellation, any other error as a failure.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync + std::fmt::Debug {
    /// The registry tag this executor handles.
    fn type_tag(&self) -> &str;

    /// Human-readable description of what this instance will do.
    fn description(&self) -> String;

    /// Static validation of the parsed configuration.
    fn validate(&self) -> Result<()>;

    /// Runs the job to completion or cancellation.
    async fn execute(&self, cancel: CancellationToken) -> Result<ExecutionResult>;
}

/// Factory producing an executor from a config blob.
pub type ExecutorFactory =
    Box<dyn Fn(&str) -> Result<Box<dyn JobExecutor>> + Send + Sync>;

/// Registry mapping job type tags to executor factories.
#[derive(Default)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for a job type tag, replacing any previous one.
    pub fn register(&mut self, type_tag: impl Into<String>, factory: ExecutorFactory) {
        self.factories.insert(type_tag.into(), factory);
    }

    /// Instantiates an executor for the given type tag and config.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Executor` for unknown tags, or whatever the
    /// factory reports for an invalid config.
    pub fn create(&self, type_tag: &str, config: &str) -> Result<Box<dyn JobExecutor>> {
        let factory = self
            .factories
            .get(type_tag)
            .ok_or_else(|| CoreError::Executor(format!("unknown job type: {type_tag}")))?;
        factory(config)
    }

    /// Validates a config blob for the given type without running anything.
    ///
    /// Used by the service layer at job-creation time.
    pub fn validate(&self, type_tag: &str, config: &str) -> Result<()> {
        self.create(type_tag, config)?.validate()
    }

    /// All registered type tags, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fixed;

    #[async_trait::async_trait]
    impl JobExecutor for Fixed {
        fn type_tag(&self) -> &str {
            "fixed"
        }

        fn description(&self) -> String {
            "always succeeds".into()
        }

        fn validate(&self) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _cancel: CancellationToken) -> Result<ExecutionResult> {
            Ok(ExecutionResult { output: "ok".into(), ..Default::default() })
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let registry = ExecutorRegistry::new();
        let err = registry.create("nope", "{}").unwrap_err();
        assert!(err.to_string().contains("unknown job type"));
    }

    #[tokio::test]
    async fn registered_factory_resolves_and_runs() {
        let mut registry = ExecutorRegistry::new();
        registry.register("fixed", Box::new(|_config| Ok(Box::new(Fixed))));

        assert_eq!(registry.types(), vec!["fixed".to_string()]);
        assert!(registry.validate("fixed", "{}").is_ok());

        let executor = registry.create("fixed", "{}").unwrap();
        let result = executor.execute(CancellationToken::new()).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "ok");
    }
}
