//! Core domain types for the lead-intake and notification-outbox system:
//! the `Lead` and `Notification` shapes, normalization/validation rules,
//! the retry/backoff schedule, and the shared error taxonomy.
//!
//! This crate has no I/O. Persistence lives in `lead-store`, delivery in
//! `lead-notify`.

pub mod backoff;
pub mod error;
pub mod idempotency;
pub mod lead;
pub mod notification;

pub use error::{ApiErrorKind, DomainError};
pub use lead::{Lead, LeadInput, SalonType};
pub use notification::{Channel, Notification, NotificationListQuery, NotificationStats, Status};
