//! Core domain models and strongly-typed identifiers.
//!
//! Defines jobs, executions, webhooks, deliveries, and newtype ID wrappers
//! for compile-time type safety. Includes SQLite serialization impls and the
//! status machines the scheduler enforces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type Db = sqlx::Sqlite;
type SqliteValueRef<'r> = sqlx::sqlite::SqliteValueRef<'r>;
type SqliteTypeInfo = sqlx::sqlite::SqliteTypeInfo;
type ArgBuf<'q> = Vec<sqlx::sqlite::SqliteArgumentValue<'q>>;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<Db> for $name {
            fn type_info() -> SqliteTypeInfo {
                <Uuid as sqlx::Type<Db>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, Db> for $name {
            fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
                Ok(Self(<Uuid as sqlx::Decode<Db>>::decode(value)?))
            }
        }

        impl<'q> sqlx::Encode<'q, Db> for $name {
            fn encode_by_ref(&self, buf: &mut ArgBuf<'q>) -> EncodeResult {
                <Uuid as sqlx::Encode<'q, Db>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id! {
    /// Strongly-typed job identifier.
    ///
    /// Wraps a UUID to prevent mixing with execution or webhook IDs. A job ID
    /// follows the record through its entire lifecycle, including the
    /// in-memory running table.
    JobId
}

uuid_id! {
    /// Strongly-typed execution identifier.
    ///
    /// One execution row is the audit record of a single run attempt.
    ExecutionId
}

uuid_id! {
    /// Strongly-typed webhook subscription identifier.
    WebhookId
}

uuid_id! {
    /// Strongly-typed webhook delivery identifier.
    ///
    /// Also travels on the wire as the `X-OneOff-Delivery` header so
    /// receivers can dedupe retried deliveries.
    DeliveryId
}

macro_rules! text_enum_sqlx {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $text)),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant)),+,
                    other => Err(format!(concat!("invalid ", stringify!($name), ": {}"), other)),
                }
            }
        }

        impl sqlx::Type<Db> for $name {
            fn type_info() -> SqliteTypeInfo {
                <&str as sqlx::Type<Db>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, Db> for $name {
            fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
                let s = <&str as sqlx::Decode<Db>>::decode(value)?;
                s.parse().map_err(Into::into)
            }
        }

        impl<'q> sqlx::Encode<'q, Db> for $name {
            fn encode_by_ref(&self, buf: &mut ArgBuf<'q>) -> EncodeResult {
                <String as sqlx::Encode<'q, Db>>::encode_by_ref(&self.to_string(), buf)
            }
        }
    };
}

/// Job lifecycle status.
///
/// The status forms a DAG with three terminal nodes:
///
/// ```text
/// scheduled -> running -> completed
///          |           -> failed
///          |           -> cancelled
///          +-> cancelled
/// ```
///
/// A job transitions `scheduled -> running` at most once per execution
/// attempt, and terminal statuses never change back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its scheduled time.
    Scheduled,
    /// A worker is executing the job right now.
    Running,
    /// Finished with exit code 0. Terminal.
    Completed,
    /// Executor failed or returned a non-zero exit code. Terminal.
    Failed,
    /// Cancelled before or during execution. Terminal.
    Cancelled,
}

impl JobStatus {
    /// Whether no further transition is permitted from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

text_enum_sqlx!(JobStatus {
    Scheduled => "scheduled",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

/// Status of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Attempt in progress.
    Running,
    /// Attempt finished successfully. Terminal.
    Completed,
    /// Attempt failed. Terminal.
    Failed,
    /// Attempt observed cooperative cancellation. Terminal.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether the execution row is frozen.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

text_enum_sqlx!(ExecutionStatus {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

/// Webhook delivery status.
///
/// `pending` with a non-null `next_retry_at` is the retry state. `success`
/// and `failed` are terminal; `failed` is only reached once attempts hit the
/// retry limit or the webhook was deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Awaiting delivery or retry.
    Pending,
    /// Endpoint acknowledged with a 2xx response. Terminal.
    Success,
    /// Retries exhausted or webhook disabled. Terminal.
    Failed,
}

impl DeliveryStatus {
    /// Whether the delivery row is frozen.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

text_enum_sqlx!(DeliveryStatus {
    Pending => "pending",
    Success => "success",
    Failed => "failed",
});

/// A durable record describing one intended execution at a specific time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,

    /// Human-readable job name.
    pub name: String,

    /// Executor type tag, resolved through the registry (`http`, `shell`,
    /// ...).
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub job_type: String,

    /// Executor-specific configuration blob (JSON), validated at creation.
    pub config: String,

    /// When the job should run. Always UTC; `timezone` is informational.
    pub scheduled_at: DateTime<Utc>,

    /// Dispatch priority, 1 (lowest) to 10 (highest).
    ///
    /// Higher priority wins when multiple jobs are due; ties break by
    /// earliest `scheduled_at`.
    pub priority: i64,

    /// Optional project label for organisation.
    pub project: Option<String>,

    /// IANA timezone name the job was created with. Storage stays UTC.
    pub timezone: String,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// When this job was created.
    pub created_at: DateTime<Utc>,

    /// When this job was last modified.
    pub updated_at: DateTime<Utc>,
}

/// The audit record of a single attempt to run a job.
///
/// Created atomically with the job's `scheduled -> running` transition and
/// append-only once terminal: `completed_at`, `duration_ms`, and the final
/// status are set together in one update.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobExecution {
    /// Unique identifier for this execution.
    pub id: ExecutionId,

    /// The job this execution belongs to.
    pub job_id: JobId,

    /// When the attempt began.
    pub started_at: DateTime<Utc>,

    /// When the attempt reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Current execution status.
    pub status: ExecutionStatus,

    /// Captured executor output (bounded by the executor).
    pub output: String,

    /// Process or pseudo exit code, when the executor produced one.
    pub exit_code: Option<i64>,

    /// Error message for failed or cancelled attempts.
    pub error: String,

    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: Option<i64>,

    /// When the row was inserted.
    pub created_at: DateTime<Utc>,
}

/// A webhook subscription: where to POST lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Webhook {
    /// Unique identifier for this webhook.
    pub id: WebhookId,

    /// Human-readable webhook name.
    pub name: String,

    /// Destination URL for deliveries.
    pub url: String,

    /// HMAC-SHA256 key. Empty string disables signing.
    pub secret: String,

    /// Comma-separated subscribed event types, e.g.
    /// `job.completed,job.failed`.
    pub events: String,

    /// Inactive webhooks receive no deliveries; their pending rows are
    /// failed by the retry scanner.
    pub is_active: bool,

    /// When this webhook was created.
    pub created_at: DateTime<Utc>,

    /// When this webhook was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// Whether this webhook is subscribed to the given event type.
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events.split(',').any(|e| e.trim() == event)
    }
}

/// One attempt sequence to POST a webhook payload.
///
/// `attempts` only ever increases; the stored payload bytes are what gets
/// signed and sent on every attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookDelivery {
    /// Unique identifier, echoed in the `X-OneOff-Delivery` header.
    pub id: DeliveryId,

    /// The webhook this delivery targets.
    pub webhook_id: WebhookId,

    /// Event type string, e.g. `job.completed` or `test`.
    pub event_type: String,

    /// Serialized payload exactly as sent on the wire.
    pub payload: String,

    /// Delivery state machine position.
    pub status: DeliveryStatus,

    /// HTTP status of the most recent attempt, if a response arrived.
    pub response_code: Option<i64>,

    /// Response body of the most recent attempt, truncated.
    pub response_body: String,

    /// Error description of the most recent failed attempt.
    pub error: String,

    /// Number of delivery attempts made so far.
    pub attempts: i64,

    /// When the next retry becomes due. NULL means immediately eligible.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// When the delivery row was created.
    pub created_at: DateTime<Utc>,
}
