//! Domain ports defining the edges of the hexagon.
//!
//! Ports describe how the domain expects to interact with driven adapters
//! (Postgres, the Redis job broker, the SMTP relay). Each trait exposes
//! strongly typed errors so adapters map their failures into predictable
//! variants instead of returning `anyhow::Result`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::auth::AuthContext;
use super::delivery::{DeliveryJob, QueuedDelivery, RelayReceipt, SmtpEnvelope};
use super::events::{EmailEvent, EventFilter, EventType, NewEmailEvent};
use super::suppression::{NewSuppression, Suppression, SuppressionFilter, SuppressionReason};
use super::template::EmailTemplate;
use super::tracking::{NewTrackingLink, NewTrackingOpen, TrackingLink, TrackingOpen};

/// Errors surfaced by persistence adapters.
///
/// Every repository port shares the same failure modes, so a single enum
/// covers them all; adapters attach enough context in `message` to debug the
/// specific query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connection could not be established or was lost mid-operation.
    #[error("store connection failed: {message}")]
    Connection { message: String },
    /// Query or mutation failed during execution.
    #[error("store query failed: {message}")]
    Query { message: String },
    /// A uniqueness constraint rejected the write.
    #[error("store conflict: {message}")]
    Conflict { message: String },
}

impl StoreError {
    /// Helper for connection oriented failures.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Helper for query failures.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Helper for uniqueness conflicts.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the job queue adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Broker infrastructure is unavailable.
    #[error("job queue unavailable: {message}")]
    Unavailable { message: String },
    /// Job payload could not be encoded or decoded.
    #[error("job payload invalid: {message}")]
    Payload { message: String },
}

impl QueueError {
    /// Helper for broker outages.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Helper for serialisation problems.
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the SMTP relay adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    /// The relay could not be dialled.
    #[error("relay connection failed: {message}")]
    Connection { message: String },
    /// The relay answered with a permanent or transient rejection.
    #[error("relay rejected the message: {message}")]
    Rejected { message: String, code: Option<u16> },
}

impl MailError {
    /// Helper for dial failures.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Helper for relay rejections.
    pub fn rejected(message: impl Into<String>, code: Option<u16>) -> Self {
        Self::Rejected {
            message: message.into(),
            code,
        }
    }

    /// SMTP status code when the relay provided one.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Connection { .. } => None,
            Self::Rejected { code, .. } => *code,
        }
    }
}

/// Fold a store failure into the domain error space.
pub(crate) fn map_store_error(error: StoreError) -> crate::domain::Error {
    match error {
        StoreError::Connection { message } | StoreError::Query { message } => {
            crate::domain::Error::internal(format!("store operation failed: {message}"))
        }
        StoreError::Conflict { message } => {
            crate::domain::Error::internal(format!("store conflict: {message}"))
        }
    }
}

/// Result of an enqueue attempt; `Duplicate` means the job id was already
/// accepted and the submission was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Duplicate,
}

/// Lookup port for API keys and their tenancy context.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Resolve the key hash to its key/domain/user/billing bundle.
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<AuthContext>, StoreError>;

    /// Record the key's last use. Callers treat this as best-effort.
    async fn touch_last_used(&self, api_key_id: &str, at: DateTime<Utc>)
        -> Result<(), StoreError>;
}

/// Quota accounting port.
#[async_trait]
pub trait BillingRepository: Send + Sync {
    /// Atomically add `count` to the tenant's used-email counter
    /// (`email_used = email_used + count`).
    async fn reserve(&self, billing_id: &str, count: i32) -> Result<(), StoreError>;

    /// Atomically subtract `count`, clamped at zero
    /// (`email_used = GREATEST(0, email_used - count)`).
    async fn release(&self, user_id: &str, count: i32) -> Result<(), StoreError>;
}

/// Template lookup port.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Find the tenant's active template by id or slug; id wins when both
    /// match different rows.
    async fn find_active(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<EmailTemplate>, StoreError>;
}

/// Event row persistence port.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append one event row.
    async fn insert(&self, event: &NewEmailEvent) -> Result<(), StoreError>;

    /// Append a batch of event rows in one round trip.
    async fn insert_batch(&self, events: &[NewEmailEvent]) -> Result<(), StoreError>;

    /// Move all of a message's rows whose current type is in `from` to `to`,
    /// replacing their metadata. Returns the number of rows touched.
    async fn transition(
        &self,
        user_id: &str,
        message_id: &str,
        from: &[EventType],
        to: EventType,
        metadata: Value,
    ) -> Result<u64, StoreError>;

    /// Filtered, paginated listing; returns the page and the total count.
    async fn list(
        &self,
        user_id: &str,
        filter: &EventFilter,
    ) -> Result<(Vec<EmailEvent>, i64), StoreError>;

    /// Every row for one message, oldest first.
    async fn list_for_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<Vec<EmailEvent>, StoreError>;

    /// Event counts per type within an optional date range.
    async fn count_by_type(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<(String, i64)>, StoreError>;
}

/// Tracking row persistence port.
#[async_trait]
pub trait TrackingRepository: Send + Sync {
    async fn insert_opens(&self, rows: &[NewTrackingOpen]) -> Result<(), StoreError>;

    async fn insert_links(&self, rows: &[NewTrackingLink]) -> Result<(), StoreError>;

    async fn find_open(&self, id: &str) -> Result<Option<TrackingOpen>, StoreError>;

    /// Atomically bump the open counter; stamps `opened_at` on first touch.
    /// Returns the new counter value.
    async fn record_open(
        &self,
        id: &str,
        first_touch: bool,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError>;

    async fn find_link(&self, id: &str) -> Result<Option<TrackingLink>, StoreError>;

    /// Atomically bump the click counter; stamps `clicked_at` on first touch.
    /// Returns the new counter value.
    async fn record_click(
        &self,
        id: &str,
        first_touch: bool,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError>;
}

/// Suppression row persistence port.
#[async_trait]
pub trait SuppressionRepository: Send + Sync {
    /// Of `emails` (already lowercased), return those with a row whose reason
    /// is in the blocking set and whose domain scope matches.
    async fn find_blocking(
        &self,
        user_id: &str,
        emails: &[String],
        domain_id: Option<&str>,
    ) -> Result<Vec<String>, StoreError>;

    /// The tenant's row for one (lowercased) address, regardless of reason.
    async fn find_by_email(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<Option<Suppression>, StoreError>;

    async fn insert(&self, row: &NewSuppression) -> Result<Suppression, StoreError>;

    /// In-place reason/metadata update used by soft-bounce accumulation.
    async fn update(
        &self,
        id: &str,
        reason: SuppressionReason,
        metadata: Value,
    ) -> Result<(), StoreError>;

    /// Delete iff the row belongs to the tenant; returns whether a row went
    /// away.
    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, StoreError>;

    async fn list(
        &self,
        user_id: &str,
        filter: &SuppressionFilter,
    ) -> Result<(Vec<Suppression>, i64), StoreError>;

    async fn counts_by_reason(&self, user_id: &str) -> Result<Vec<(String, i64)>, StoreError>;
}

/// Durable at-least-once job queue with dedup by job id.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a job; a second submission with the same job id is a no-op.
    async fn enqueue(&self, job: &DeliveryJob) -> Result<EnqueueOutcome, QueueError>;

    /// Block up to `wait` for the next ready job.
    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedDelivery>, QueueError>;

    /// Re-queue a failed job for another attempt after `delay`.
    async fn retry(
        &self,
        job: &DeliveryJob,
        attempt: u32,
        delay: Duration,
    ) -> Result<(), QueueError>;
}

/// Upstream SMTP relay.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, envelope: &SmtpEnvelope) -> Result<RelayReceipt, MailError>;
}
