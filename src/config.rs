//! Configuration for the OneOff scheduler service.
//!
//! Loaded in priority order: environment variables (prefixed `ONEOFF_`),
//! then `oneoff.toml`, then built-in defaults. The service runs
//! out-of-the-box with production-ready defaults.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use oneoff_webhook::WebhookConfig;
use oneoff_worker::PoolConfig;
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "oneoff.toml";

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Worker count. Zero means auto: half the cores, at least one.
    #[serde(default)]
    pub worker_count: usize,

    /// Days to keep execution rows; zero or negative disables sweeping.
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: i64,

    /// Scheduler poll interval in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Retention sweep interval in seconds.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Webhook delivery worker count.
    #[serde(default = "default_webhook_workers")]
    pub webhook_workers: usize,

    /// Webhook delivery queue capacity.
    #[serde(default = "default_webhook_queue_size")]
    pub webhook_queue_size: usize,

    /// Delivery attempts before a webhook delivery is failed for good.
    #[serde(default = "default_webhook_max_retries")]
    pub webhook_max_retries: i64,

    /// Retry scanner interval in seconds.
    #[serde(default = "default_webhook_retry_scanner_interval_secs")]
    pub webhook_retry_scanner_interval_secs: u64,

    /// HTTP timeout per delivery attempt in seconds.
    #[serde(default = "default_webhook_http_timeout_secs")]
    pub webhook_http_timeout_secs: u64,

    /// Response body bytes kept on delivery rows.
    #[serde(default = "default_webhook_response_max_bytes")]
    pub webhook_response_max_bytes: usize,

    /// Ceiling on the delivery retry backoff, in seconds.
    #[serde(default = "default_webhook_backoff_cap_secs")]
    pub webhook_backoff_cap_secs: u64,

    /// Graceful shutdown deadline in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Config {
    /// Loads configuration from defaults, `oneoff.toml`, and `ONEOFF_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("ONEOFF_"));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved worker count with the auto default applied.
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            oneoff_worker::default_worker_count()
        } else {
            self.worker_count
        }
    }

    /// Converts to the worker pool configuration.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.resolved_worker_count(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            log_retention_days: self.log_retention_days,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    /// Converts to the webhook pipeline configuration.
    pub fn to_webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            workers: self.webhook_workers,
            queue_size: self.webhook_queue_size,
            max_retries: self.webhook_max_retries,
            retry_scanner_interval: Duration::from_secs(self.webhook_retry_scanner_interval_secs),
            http_timeout: Duration::from_secs(self.webhook_http_timeout_secs),
            response_max_bytes: self.webhook_response_max_bytes,
            backoff_cap: Duration::from_secs(self.webhook_backoff_cap_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.is_empty() {
            anyhow::bail!("db_path cannot be empty");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }
        if self.webhook_workers == 0 {
            anyhow::bail!("webhook_workers must be greater than 0");
        }
        if self.webhook_queue_size == 0 {
            anyhow::bail!("webhook_queue_size must be greater than 0");
        }
        if self.webhook_max_retries < 1 {
            anyhow::bail!("webhook_max_retries must be at least 1");
        }
        if self.webhook_response_max_bytes == 0 {
            anyhow::bail!("webhook_response_max_bytes must be greater than 0");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            worker_count: 0,
            log_retention_days: default_log_retention_days(),
            poll_interval_secs: default_poll_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            webhook_workers: default_webhook_workers(),
            webhook_queue_size: default_webhook_queue_size(),
            webhook_max_retries: default_webhook_max_retries(),
            webhook_retry_scanner_interval_secs: default_webhook_retry_scanner_interval_secs(),
            webhook_http_timeout_secs: default_webhook_http_timeout_secs(),
            webhook_response_max_bytes: default_webhook_response_max_bytes(),
            webhook_backoff_cap_secs: default_webhook_backoff_cap_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_filter: default_log_filter(),
        }
    }
}

fn default_db_path() -> String {
    "./oneoff.db".to_string()
}

fn default_log_retention_days() -> i64 {
    90
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_cleanup_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_webhook_workers() -> usize {
    3
}

fn default_webhook_queue_size() -> usize {
    100
}

fn default_webhook_max_retries() -> i64 {
    5
}

fn default_webhook_retry_scanner_interval_secs() -> u64 {
    30
}

fn default_webhook_http_timeout_secs() -> u64 {
    30
}

fn default_webhook_response_max_bytes() -> usize {
    1024
}

fn default_webhook_backoff_cap_secs() -> u64 {
    5 * 60
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_match_specification() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.cleanup_interval_secs, 86_400);
        assert_eq!(config.webhook_workers, 3);
        assert_eq!(config.webhook_queue_size, 100);
        assert_eq!(config.webhook_max_retries, 5);
        assert_eq!(config.webhook_retry_scanner_interval_secs, 30);
        assert_eq!(config.webhook_http_timeout_secs, 30);
        assert_eq!(config.webhook_response_max_bytes, 1024);
        assert_eq!(config.webhook_backoff_cap_secs, 300);
        assert!(config.resolved_worker_count() >= 1);
    }

    #[test]
    fn env_overrides_take_priority() {
        Jail::expect_with(|jail| {
            jail.set_env("ONEOFF_DB_PATH", "/tmp/jobs.db");
            jail.set_env("ONEOFF_WORKER_COUNT", "7");
            jail.set_env("ONEOFF_WEBHOOK_MAX_RETRIES", "9");

            let config = Config::load().expect("config should load");
            assert_eq!(config.db_path, "/tmp/jobs.db");
            assert_eq!(config.resolved_worker_count(), 7);
            assert_eq!(config.webhook_max_retries, 9);

            Ok(())
        });
    }

    #[test]
    fn config_file_is_merged() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "oneoff.toml",
                r#"
                worker_count = 2
                poll_interval_secs = 1
                log_retention_days = 7
                "#,
            )?;

            let config = Config::load().expect("config should load");
            assert_eq!(config.resolved_worker_count(), 2);
            assert_eq!(config.to_pool_config().poll_interval, Duration::from_secs(1));
            assert_eq!(config.to_pool_config().log_retention_days, 7);

            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = Config { webhook_workers: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { poll_interval_secs: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { webhook_max_retries: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
