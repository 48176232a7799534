use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel for a notification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Webhook,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Webhook => "webhook",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "email" => Some(Channel::Email),
            "webhook" => Some(Channel::Webhook),
            _ => None,
        }
    }
}

/// Notification job status. `Sent` and `Failed` are terminal; the worker
/// must never transition a job out of either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Sent => "sent",
            Status::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Status::Pending),
            "processing" => Some(Status::Processing),
            "sent" => Some(Status::Sent),
            "failed" => Some(Status::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Sent | Status::Failed)
    }
}

/// One row of the outbox: a single (lead, channel) delivery job.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub channel: Channel,
    pub status: Status,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Filter set for `NotificationRepository::list`.
#[derive(Debug, Clone, Default)]
pub struct NotificationListQuery {
    pub status: Option<Status>,
    pub channel: Option<Channel>,
    pub lead_id: Option<Uuid>,
    pub before: Option<DateTime<Utc>>,
    pub limit: i64,
}

pub const DEFAULT_LIST_LIMIT: i64 = 100;
pub const MAX_LIST_LIMIT: i64 = 5000;

impl NotificationListQuery {
    /// Clamps `limit` into `(0, MAX_LIST_LIMIT]`, defaulting to
    /// `DEFAULT_LIST_LIMIT` when unset.
    pub fn capped_limit(&self) -> i64 {
        if self.limit <= 0 {
            DEFAULT_LIST_LIMIT
        } else {
            self.limit.min(MAX_LIST_LIMIT)
        }
    }
}

/// Aggregate backlog view returned by `NotificationRepository::stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationStats {
    pub counts_by_status: std::collections::HashMap<String, i64>,
    pub pending_ready_count: i64,
    pub pending_delayed_count: i64,
    pub oldest_ready_pending_created_at: Option<DateTime<Utc>>,
}

impl NotificationStats {
    /// Age in seconds of the oldest ready-to-send pending row, clamped to
    /// be non-negative (clock skew between app and DB server can otherwise
    /// produce a small negative duration).
    pub fn oldest_ready_pending_age_seconds(&self, now: DateTime<Utc>) -> f64 {
        match self.oldest_ready_pending_created_at {
            Some(ts) => (now - ts).num_milliseconds() as f64 / 1000.0,
            None => 0.0,
        }
        .max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sent_and_failed() {
        assert!(Status::Sent.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Processing.is_terminal());
    }

    #[test]
    fn list_query_caps_and_defaults_limit() {
        let mut q = NotificationListQuery::default();
        assert_eq!(q.capped_limit(), DEFAULT_LIST_LIMIT);
        q.limit = 999_999;
        assert_eq!(q.capped_limit(), MAX_LIST_LIMIT);
        q.limit = 10;
        assert_eq!(q.capped_limit(), 10);
    }

    #[test]
    fn channel_round_trips_through_str() {
        for c in [Channel::Email, Channel::Webhook] {
            assert_eq!(Channel::parse(c.as_str()), Some(c));
        }
    }
}
