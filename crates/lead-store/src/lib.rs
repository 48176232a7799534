//! Repository traits for the two durable aggregates (leads and outbox
//! notifications), plus three implementations: SQLite and Postgres (via
//! `sqlx`) for production, and an in-memory mutex-guarded version for
//! tests.
//!
//! Consumers (the intake service, the outbox worker) depend only on the
//! trait objects (`Arc<dyn LeadRepository>`, `Arc<dyn NotificationRepository>`),
//! never on a concrete backend.

pub mod memory;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lead_domain::{Channel, Lead, LeadInput, Notification, NotificationListQuery, NotificationStats};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Capability set for lead persistence. See SPEC_FULL.md §4.1.
#[async_trait]
pub trait LeadRepository: Send + Sync {
    /// Normalizes and validates `input` internally is the caller's job
    /// (lead-domain::{normalize, validate}); `create` only handles the
    /// idempotency-hash fast path and the insert.
    async fn create(
        &self,
        input: LeadInput,
        salon_type: lead_domain::SalonType,
    ) -> Result<Lead, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Lead, StoreError>;

    async fn list(&self, limit: i64, before: Option<DateTime<Utc>>) -> Result<Vec<Lead>, StoreError>;
}

/// Capability set for the outbox. See SPEC_FULL.md §4.2.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Inserts a pending row for `(lead_id, channel)`; a conflict on the
    /// unique `(lead_id, channel)` index is swallowed as a no-op, never an
    /// error.
    async fn enqueue(&self, lead_id: Uuid, channel: Channel) -> Result<(), StoreError>;

    /// Atomically claims up to `limit` eligible rows, transitioning them to
    /// `processing`. Safe under concurrent callers: each row goes to at
    /// most one caller per cycle.
    async fn claim_batch(&self, limit: i64) -> Result<Vec<Notification>, StoreError>;

    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError>;

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), StoreError>;

    async fn mark_failed(&self, id: Uuid, attempts: i32, last_error: &str) -> Result<(), StoreError>;

    async fn list(&self, query: NotificationListQuery) -> Result<Vec<Notification>, StoreError>;

    async fn stats(&self) -> Result<NotificationStats, StoreError>;
}

/// How long a `processing` row may sit unclaimed before it's considered
/// abandoned (worker crash) and becomes reclaimable.
pub const STUCK_PROCESSING_THRESHOLD_MINUTES: i64 = 10;
