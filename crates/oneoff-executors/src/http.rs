//! HTTP request executor.
//!
//! Runs one HTTP call and maps the response onto the execution contract:
//! any delivered response is a result (status >= 400 exits 1), transport
//! failures exit 1 with the error text, and cancellation interrupts the
//! round trip through the token.

use std::{collections::HashMap, fmt::Write as _, time::Duration};

use oneoff_core::{
    executor::{ExecutionResult, JobExecutor},
    CoreError, Result,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Configuration blob for `http` jobs.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpJobConfig {
    /// Target URL. Required.
    pub url: String,

    /// HTTP method; defaults to GET.
    #[serde(default)]
    pub method: String,

    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request body.
    #[serde(default)]
    pub body: String,

    /// Request timeout in seconds; defaults to 30.
    #[serde(default)]
    pub timeout: u64,
}

/// Executor for the `http` job type.
#[derive(Debug)]
pub struct HttpExecutor {
    config: HttpJobConfig,
}

impl HttpExecutor {
    /// Parses the config blob into an executor.
    ///
    /// # Errors
    ///
    /// `CoreError::InvalidInput` when the blob is not valid JSON.
    pub fn from_config(config: &str) -> Result<Self> {
        let config: HttpJobConfig = serde_json::from_str(config)
            .map_err(|e| CoreError::invalid_input(format!("invalid http job config: {e}")))?;
        Ok(Self { config })
    }

    fn method(&self) -> String {
        if self.config.method.is_empty() {
            "GET".to_string()
        } else {
            self.config.method.to_uppercase()
        }
    }

    fn timeout(&self) -> Duration {
        let secs = if self.config.timeout > 0 { self.config.timeout } else { DEFAULT_TIMEOUT_SECS };
        Duration::from_secs(secs)
    }
}

#[async_trait::async_trait]
impl JobExecutor for HttpExecutor {
    fn type_tag(&self) -> &str {
        "http"
    }

    fn description(&self) -> String {
        format!("HTTP {} request to {}", self.method(), self.config.url)
    }

    fn validate(&self) -> Result<()> {
        if self.config.url.is_empty() {
            return Err(CoreError::invalid_input("url is required"));
        }
        let method = self.method();
        if !VALID_METHODS.contains(&method.as_str()) {
            return Err(CoreError::invalid_input(format!("invalid HTTP method: {method}")));
        }
        Ok(())
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<ExecutionResult> {
        self.validate()?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout())
            .build()
            .map_err(|e| CoreError::Executor(format!("failed to build HTTP client: {e}")))?;

        let method: reqwest::Method = self
            .method()
            .parse()
            .map_err(|_| CoreError::invalid_input(format!("invalid HTTP method: {}", self.method())))?;

        let mut request = client.request(method, &self.config.url);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        if !self.config.body.is_empty() {
            request = request.body(self.config.body.clone());
        }

        let response = tokio::select! {
            response = request.send() => response,
            () = cancel.cancelled() => {
                return Err(CoreError::Executor("http request cancelled".into()));
            }
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return Ok(ExecutionResult {
                    output: String::new(),
                    exit_code: 1,
                    error: format!("HTTP request failed: {e}"),
                });
            }
        };

        let status = response.status();
        let mut output = format!("Status: {status}\n\nHeaders:\n");
        for (key, value) in response.headers() {
            let _ = writeln!(output, "{key}: {}", value.to_str().unwrap_or("<binary>"));
        }

        let body = tokio::select! {
            body = response.text() => body.unwrap_or_default(),
            () = cancel.cancelled() => {
                return Err(CoreError::Executor("http request cancelled".into()));
            }
        };
        if !body.is_empty() {
            let _ = write!(output, "\nBody:\n{body}");
        }

        let (exit_code, error) = if status.as_u16() >= 400 {
            (1, format!("HTTP request returned error status: {}", status.as_u16()))
        } else {
            (0, String::new())
        };

        Ok(ExecutionResult { output, exit_code, error })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn rejects_missing_url_and_bad_method() {
        let executor = HttpExecutor::from_config(r#"{"url": ""}"#).unwrap();
        assert!(executor.validate().is_err());

        let executor =
            HttpExecutor::from_config(r#"{"url": "http://example.com", "method": "YEET"}"#)
                .unwrap();
        assert!(executor.validate().is_err());
    }

    #[test]
    fn method_defaults_to_get() {
        let executor = HttpExecutor::from_config(r#"{"url": "http://example.com"}"#).unwrap();
        assert!(executor.validate().is_ok());
        assert_eq!(executor.type_tag(), "http");
        assert_eq!(executor.description(), "HTTP GET request to http://example.com");
    }

    #[tokio::test]
    async fn successful_request_exits_zero_with_body_in_output() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/run"))
            .respond_with(ResponseTemplate::new(200).set_body_string("done"))
            .mount(&server)
            .await;

        let config = format!(r#"{{"url": "{}/run", "method": "POST", "body": "go"}}"#, server.uri());
        let executor = HttpExecutor::from_config(&config).unwrap();
        let result = executor.execute(CancellationToken::new()).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("done"));
        assert!(result.error.is_empty());
    }

    #[tokio::test]
    async fn error_status_maps_to_nonzero_exit() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = format!(r#"{{"url": "{}"}}"#, server.uri());
        let executor = HttpExecutor::from_config(&config).unwrap();
        let result = executor.execute(CancellationToken::new()).await.unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(result.error.contains("503"));
    }

    #[tokio::test]
    async fn transport_failure_is_a_failed_result_not_an_error() {
        let executor =
            HttpExecutor::from_config(r#"{"url": "http://127.0.0.1:1/nope", "timeout": 1}"#)
                .unwrap();
        let result = executor.execute(CancellationToken::new()).await.unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(result.error.contains("HTTP request failed"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_request() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let config = format!(r#"{{"url": "{}"}}"#, server.uri());
        let executor = HttpExecutor::from_config(&config).unwrap();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let result = executor.execute(cancel).await;
        assert!(result.is_err());
    }
}
