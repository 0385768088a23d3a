//! Webhook delivery pipeline for the OneOff scheduler.
//!
//! Turns job lifecycle events into signed HTTP notifications: intake
//! persists a delivery row per subscribed webhook, bounded workers POST
//! with HMAC signatures and a hard timeout, and a retry scanner drives the
//! exponential-backoff schedule until success or exhaustion.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod service;
pub mod signature;

pub use client::{DeliveryClient, DeliveryRequest, DeliveryResponse, USER_AGENT};
pub use error::{DeliveryError, Result};
pub use service::{backoff_delay, WebhookConfig, WebhookService, WEBHOOK_DISABLED};
pub use signature::{sign_payload, signature_header, verify_signature, SIGNATURE_PREFIX};
