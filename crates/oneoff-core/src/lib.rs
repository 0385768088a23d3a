//! Core domain models, storage, and abstractions for the OneOff scheduler.
//!
//! Provides strongly-typed domain primitives, the execution/webhook data
//! model, lifecycle events, the executor seam, and the SQLite-backed store.
//! The worker and webhook crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod executor;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    EventType, JobEvent, JobEventHandler, NoOpJobEventHandler, WebhookData, WebhookPayload,
};
pub use executor::{ExecutionResult, ExecutorRegistry, JobExecutor};
pub use models::{
    DeliveryId, DeliveryStatus, ExecutionId, ExecutionStatus, Job, JobExecution, JobId, JobStatus,
    Webhook, WebhookDelivery, WebhookId,
};
pub use storage::{migrate, Storage};
pub use time::{Clock, RealClock};
