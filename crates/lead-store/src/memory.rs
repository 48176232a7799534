//! In-memory repository implementations used by tests and by local/dev
//! runs with no database configured. Each store is a single mutex guarding
//! a row map, mirroring the observable contract of the relational
//! implementations (including stuck-claim reclamation).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lead_domain::{
    Channel, Lead, LeadInput, Notification, NotificationListQuery, NotificationStats, SalonType,
    Status,
};
use uuid::Uuid;

use crate::{LeadRepository, NotificationRepository, StoreError, STUCK_PROCESSING_THRESHOLD_MINUTES};

#[derive(Default)]
struct LeadState {
    rows: HashMap<Uuid, Lead>,
    /// Fast-path idempotency enforcement; not a substitute for the
    /// database's unique index (see DESIGN.md's Open Question resolution).
    by_hash: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct InMemoryLeadRepository {
    state: Mutex<LeadState>,
}

impl InMemoryLeadRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn create(&self, input: LeadInput, salon_type: SalonType) -> Result<Lead, StoreError> {
        let mut state = self.state.lock().unwrap();

        if let Some(hash) = &input.idempotency_key_hash {
            if let Some(existing_id) = state.by_hash.get(hash) {
                return Ok(state.rows.get(existing_id).expect("by_hash entry dangling").clone());
            }
        }

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let hash = input.idempotency_key_hash.clone();
        let lead = Lead::from_validated(id, created_at, input, salon_type);

        state.rows.insert(id, lead.clone());
        if let Some(hash) = hash {
            state.by_hash.insert(hash, id);
        }
        Ok(lead)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Lead, StoreError> {
        let state = self.state.lock().unwrap();
        state.rows.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list(&self, limit: i64, before: Option<DateTime<Utc>>) -> Result<Vec<Lead>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Lead> = state
            .rows
            .values()
            .filter(|l| before.map(|b| l.created_at < b).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    rows: Mutex<HashMap<Uuid, Notification>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn insert_raw(&self, n: Notification) {
        self.rows.lock().unwrap().insert(n.id, n);
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn enqueue(&self, lead_id: Uuid, channel: Channel) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let exists = rows.values().any(|n| n.lead_id == lead_id && n.channel == channel);
        if exists {
            return Ok(());
        }
        let now = Utc::now();
        let id = Uuid::new_v4();
        rows.insert(
            id,
            Notification {
                id,
                lead_id,
                channel,
                status: Status::Pending,
                attempts: 0,
                next_attempt_at: now,
                last_error: String::new(),
                created_at: now,
                updated_at: now,
                sent_at: None,
            },
        );
        Ok(())
    }

    async fn claim_batch(&self, limit: i64) -> Result<Vec<Notification>, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let now = Utc::now();
        let stuck_before = now - Duration::minutes(STUCK_PROCESSING_THRESHOLD_MINUTES);

        let mut eligible: Vec<Uuid> = rows
            .values()
            .filter(|n| {
                (n.status == Status::Pending && n.next_attempt_at <= now)
                    || (n.status == Status::Processing && n.updated_at <= stuck_before)
            })
            .map(|n| n.id)
            .collect();

        eligible.sort_by(|a, b| {
            let na = &rows[a];
            let nb = &rows[b];
            na.next_attempt_at
                .cmp(&nb.next_attempt_at)
                .then(na.created_at.cmp(&nb.created_at))
        });
        eligible.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            let n = rows.get_mut(&id).unwrap();
            n.status = Status::Processing;
            n.updated_at = now;
            claimed.push(n.clone());
        }
        Ok(claimed)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let n = rows.get_mut(&id).ok_or(StoreError::NotFound)?;
        let now = Utc::now();
        n.status = Status::Sent;
        n.sent_at = Some(now);
        n.updated_at = now;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let n = rows.get_mut(&id).ok_or(StoreError::NotFound)?;
        n.status = Status::Pending;
        n.attempts = attempts;
        n.next_attempt_at = next_attempt_at;
        n.last_error = last_error.to_string();
        n.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: i32, last_error: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let n = rows.get_mut(&id).ok_or(StoreError::NotFound)?;
        n.status = Status::Failed;
        n.attempts = attempts;
        n.last_error = last_error.to_string();
        n.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self, query: NotificationListQuery) -> Result<Vec<Notification>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<Notification> = rows
            .values()
            .filter(|n| query.status.map(|s| s == n.status).unwrap_or(true))
            .filter(|n| query.channel.map(|c| c == n.channel).unwrap_or(true))
            .filter(|n| query.lead_id.map(|id| id == n.lead_id).unwrap_or(true))
            .filter(|n| query.before.map(|b| n.created_at < b).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(query.capped_limit() as usize);
        Ok(out)
    }

    async fn stats(&self) -> Result<NotificationStats, StoreError> {
        let rows = self.rows.lock().unwrap();
        let now = Utc::now();
        let mut counts_by_status = HashMap::new();
        for st in ["pending", "processing", "sent", "failed"] {
            counts_by_status.insert(st.to_string(), 0i64);
        }
        let mut pending_ready_count = 0i64;
        let mut pending_delayed_count = 0i64;
        let mut oldest_ready_pending_created_at: Option<DateTime<Utc>> = None;

        for n in rows.values() {
            *counts_by_status.entry(n.status.as_str().to_string()).or_insert(0) += 1;
            if n.status == Status::Pending {
                if n.next_attempt_at <= now {
                    pending_ready_count += 1;
                    oldest_ready_pending_created_at = Some(match oldest_ready_pending_created_at {
                        Some(existing) => existing.min(n.created_at),
                        None => n.created_at,
                    });
                } else {
                    pending_delayed_count += 1;
                }
            }
        }

        Ok(NotificationStats {
            counts_by_status,
            pending_ready_count,
            pending_delayed_count,
            oldest_ready_pending_created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lead_domain::backoff;

    fn sample_input() -> LeadInput {
        LeadInput {
            business_name: "Biz".into(),
            contact_name: "A".into(),
            phone_whatsapp: "+6281234567890".into(),
            city: "Jakarta".into(),
            salon_type_raw: "SALON".into(),
            consent: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_by_hash() {
        let repo = InMemoryLeadRepository::new();
        let mut input = sample_input();
        input.idempotency_key_hash = Some("abc".into());
        let first = repo.create(input.clone(), SalonType::Salon).await.unwrap();
        let second = repo.create(input, SalonType::Salon).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn create_without_hash_always_makes_a_new_row() {
        let repo = InMemoryLeadRepository::new();
        let first = repo.create(sample_input(), SalonType::Salon).await.unwrap();
        let second = repo.create(sample_input(), SalonType::Salon).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_respects_limit() {
        let repo = InMemoryLeadRepository::new();
        for _ in 0..5 {
            repo.create(sample_input(), SalonType::Salon).await.unwrap();
        }
        let rows = repo.list(3, None).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].created_at >= rows[1].created_at);
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_lead_and_channel() {
        let repo = InMemoryNotificationRepository::new();
        let lead_id = Uuid::new_v4();
        repo.enqueue(lead_id, Channel::Email).await.unwrap();
        repo.enqueue(lead_id, Channel::Email).await.unwrap();
        let rows = repo
            .list(NotificationListQuery {
                lead_id: Some(lead_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn claim_batch_transitions_to_processing_and_is_exclusive() {
        let repo = InMemoryNotificationRepository::new();
        let lead_id = Uuid::new_v4();
        repo.enqueue(lead_id, Channel::Email).await.unwrap();

        let first = repo.claim_batch(10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, Status::Processing);

        let second = repo.claim_batch(10).await.unwrap();
        assert!(second.is_empty(), "already-processing row must not be claimed twice");
    }

    #[tokio::test]
    async fn stuck_processing_row_is_reclaimable() {
        let repo = InMemoryNotificationRepository::new();
        let lead_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let stale = Utc::now() - Duration::minutes(11);
        repo.insert_raw(Notification {
            id,
            lead_id,
            channel: Channel::Webhook,
            status: Status::Processing,
            attempts: 1,
            next_attempt_at: stale,
            last_error: String::new(),
            created_at: stale,
            updated_at: stale,
            sent_at: None,
        });

        let claimed = repo.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
    }

    #[tokio::test]
    async fn retry_then_give_up_follows_backoff_decision() {
        let repo = InMemoryNotificationRepository::new();
        let lead_id = Uuid::new_v4();
        repo.enqueue(lead_id, Channel::Email).await.unwrap();
        let claimed = repo.claim_batch(10).await.unwrap();
        let job = &claimed[0];

        match backoff::decide_retry(job.attempts) {
            backoff::RetryDecision::Retry { attempts, backoff } => {
                repo.mark_retry(job.id, attempts, Utc::now() + backoff, "boom")
                    .await
                    .unwrap();
            }
            backoff::RetryDecision::GiveUp { .. } => panic!("expected retry on first failure"),
        }

        let rows = repo
            .list(NotificationListQuery {
                lead_id: Some(lead_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows[0].status, Status::Pending);
        assert_eq!(rows[0].attempts, 1);
        assert!(!rows[0].last_error.is_empty());
    }

    #[tokio::test]
    async fn stats_reports_ready_and_delayed_pending() {
        let repo = InMemoryNotificationRepository::new();
        let now = Utc::now();
        repo.insert_raw(Notification {
            id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            channel: Channel::Email,
            status: Status::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: String::new(),
            created_at: now,
            updated_at: now,
            sent_at: None,
        });
        repo.insert_raw(Notification {
            id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            channel: Channel::Webhook,
            status: Status::Pending,
            attempts: 1,
            next_attempt_at: now + Duration::hours(1),
            last_error: "boom".into(),
            created_at: now,
            updated_at: now,
            sent_at: None,
        });

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.pending_ready_count, 1);
        assert_eq!(stats.pending_delayed_count, 1);
        assert!(stats.oldest_ready_pending_created_at.is_some());
    }
}
