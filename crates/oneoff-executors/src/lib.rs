//! Built-in job executors for the OneOff scheduler.
//!
//! Two portable job types ship with the engine: `http` runs a single HTTP
//! request, `shell` runs a script under `/bin/sh`. Both are registered on an
//! [`ExecutorRegistry`] via [`register_builtin_executors`] and honour the
//! cancellation token during their long waits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod http;
pub mod shell;

use oneoff_core::executor::ExecutorRegistry;

pub use http::{HttpExecutor, HttpJobConfig};
pub use shell::{ShellExecutor, ShellJobConfig};

/// Registers every built-in job type on the registry.
pub fn register_builtin_executors(registry: &mut ExecutorRegistry) {
    registry.register("http", Box::new(|config| Ok(Box::new(HttpExecutor::from_config(config)?))));
    registry
        .register("shell", Box::new(|config| Ok(Box::new(ShellExecutor::from_config(config)?))));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_types_are_registered() {
        let mut registry = ExecutorRegistry::new();
        register_builtin_executors(&mut registry);

        assert_eq!(registry.types(), vec!["http".to_string(), "shell".to_string()]);
        assert!(registry.validate("shell", r#"{"script": "true"}"#).is_ok());
        assert!(registry.validate("http", r#"{"url": ""}"#).is_err());
    }
}
