//! HTTP client for webhook delivery.
//!
//! Builds the outbound POST with the OneOff header set, signs the payload
//! when the webhook carries a secret, and reads responses with a hard
//! truncation so a misbehaving receiver cannot bloat the audit trail.

use std::time::Duration;

use bytes::Bytes;
use oneoff_core::models::DeliveryId;
use tracing::debug;

use crate::{
    error::{DeliveryError, Result},
    signature,
};

/// User agent sent on every delivery.
pub const USER_AGENT: &str = "OneOff-Webhook/1.0";

/// One outbound delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Destination URL.
    pub url: String,
    /// Exact payload bytes; also the HMAC input.
    pub payload: Bytes,
    /// Event name for the `X-OneOff-Event` header.
    pub event_type: String,
    /// Delivery id for the `X-OneOff-Delivery` header.
    pub delivery_id: DeliveryId,
    /// HMAC key. Empty disables signing.
    pub secret: String,
}

/// What came back from the receiver.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated to the configured maximum.
    pub body: String,
    /// Whether the status is 2xx.
    pub is_success: bool,
}

/// Delivery client with pooled connections and a fixed timeout.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    timeout: Duration,
    response_max_bytes: usize,
}

impl DeliveryClient {
    /// Creates a client with the given request timeout and response cap.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Configuration`] when reqwest refuses the
    /// settings.
    pub fn new(timeout: Duration, response_max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DeliveryError::Configuration(e.to_string()))?;

        Ok(Self { client, timeout, response_max_bytes })
    }

    /// POSTs one delivery attempt and reads the (truncated) response.
    ///
    /// An HTTP response of any status is an `Ok`; only transport failures
    /// are errors.
    pub async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryResponse> {
        let mut http_request = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-OneOff-Event", &request.event_type)
            .header("X-OneOff-Delivery", request.delivery_id.to_string());

        if !request.secret.is_empty() {
            http_request = http_request.header(
                "X-OneOff-Signature",
                signature::signature_header(&request.payload, &request.secret),
            );
        }

        let response =
            http_request.body(request.payload.clone()).send().await.map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else {
                    DeliveryError::Network(e.to_string())
                }
            })?;

        let status_code = response.status().as_u16();
        let is_success = response.status().is_success();
        let body = self.read_truncated(response).await;

        debug!(
            delivery_id = %request.delivery_id,
            status = status_code,
            "webhook response received"
        );

        Ok(DeliveryResponse { status_code, body, is_success })
    }

    async fn read_truncated(&self, response: reqwest::Response) -> String {
        match response.bytes().await {
            Ok(bytes) => {
                let cut = bytes.len().min(self.response_max_bytes);
                String::from_utf8_lossy(&bytes[..cut]).into_owned()
            }
            Err(e) => {
                debug!(error = %e, "failed to read response body");
                String::new()
            }
        }
    }
}
