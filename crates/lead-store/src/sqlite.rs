//! SQLite-backed repositories. SQLite has no `SELECT ... FOR UPDATE SKIP
//! LOCKED`; instead `claim_batch` runs inside a single `IMMEDIATE`
//! transaction, which is sufficient because SQLite already serializes
//! writers at the connection-pool level.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use lead_domain::{
    Channel, Lead, LeadInput, Notification, NotificationListQuery, NotificationStats, SalonType,
    Status,
};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

use crate::{LeadRepository, NotificationRepository, StoreError, STUCK_PROCESSING_THRESHOLD_MINUTES};

pub struct SqliteLeadRepository {
    pool: SqlitePool,
}

pub struct SqliteNotificationRepository {
    pool: SqlitePool,
}

/// Applies the schema if it doesn't already exist. Called once at startup
/// by both repositories against the same pool.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            idempotency_key_hash TEXT,
            business_name TEXT NOT NULL,
            contact_name TEXT NOT NULL,
            phone_whatsapp TEXT NOT NULL,
            city TEXT NOT NULL,
            salon_type TEXT NOT NULL,
            consent INTEGER NOT NULL,
            chair_count INTEGER,
            specialization TEXT,
            current_brands_used TEXT,
            monthly_spend_range TEXT,
            email TEXT,
            message TEXT,
            page_url_initial TEXT,
            page_url_current TEXT,
            user_agent TEXT,
            ip_address TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_leads_idempotency_hash \
         ON leads(idempotency_key_hash) WHERE idempotency_key_hash IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lead_notifications (
            id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT NOT NULL,
            last_error TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            sent_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_lead_notifications_lead_channel \
         ON lead_notifications(lead_id, channel)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_lead_notifications_claim \
         ON lead_notifications(status, next_attempt_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
                .unwrap_or_else(|_| Utc::now())
        })
}

fn lead_from_row(row: &sqlx::sqlite::SqliteRow) -> Lead {
    let salon_type_raw: String = row.get("salon_type");
    Lead {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str()).unwrap_or_default(),
        created_at: parse_ts(row.get::<String, _>("created_at").as_str()),
        idempotency_key_hash: row.get("idempotency_key_hash"),
        business_name: row.get("business_name"),
        contact_name: row.get("contact_name"),
        phone_whatsapp: row.get("phone_whatsapp"),
        city: row.get("city"),
        salon_type: match salon_type_raw.as_str() {
            "BARBER" => SalonType::Barber,
            "BRIDAL" => SalonType::Bridal,
            "UNISEX" => SalonType::Unisex,
            "OTHER" => SalonType::Other,
            _ => SalonType::Salon,
        },
        consent: row.get::<i64, _>("consent") != 0,
        chair_count: row.get("chair_count"),
        specialization: row.get("specialization"),
        current_brands_used: row.get("current_brands_used"),
        monthly_spend_range: row.get("monthly_spend_range"),
        email: row.get("email"),
        message: row.get("message"),
        page_url_initial: row.get("page_url_initial"),
        page_url_current: row.get("page_url_current"),
        user_agent: row.get("user_agent"),
        ip_address: row.get("ip_address"),
    }
}

fn notification_from_row(row: &sqlx::sqlite::SqliteRow) -> Notification {
    let channel_raw: String = row.get("channel");
    let status_raw: String = row.get("status");
    let sent_at: Option<String> = row.get("sent_at");
    Notification {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str()).unwrap_or_default(),
        lead_id: Uuid::parse_str(row.get::<String, _>("lead_id").as_str()).unwrap_or_default(),
        channel: Channel::parse(&channel_raw).unwrap_or(Channel::Email),
        status: Status::parse(&status_raw).unwrap_or(Status::Pending),
        attempts: row.get::<i64, _>("attempts") as i32,
        next_attempt_at: parse_ts(row.get::<String, _>("next_attempt_at").as_str()),
        last_error: row.get("last_error"),
        created_at: parse_ts(row.get::<String, _>("created_at").as_str()),
        updated_at: parse_ts(row.get::<String, _>("updated_at").as_str()),
        sent_at: sent_at.map(|s| parse_ts(&s)),
    }
}

impl SqliteLeadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl SqliteNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadRepository for SqliteLeadRepository {
    async fn create(&self, input: LeadInput, salon_type: SalonType) -> Result<Lead, StoreError> {
        if let Some(hash) = &input.idempotency_key_hash {
            let existing = sqlx::query("SELECT * FROM leads WHERE idempotency_key_hash = ?")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = existing {
                return Ok(lead_from_row(&row));
            }
        }

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let lead = Lead::from_validated(id, created_at, input, salon_type);

        let result = sqlx::query(
            r#"
            INSERT INTO leads (
                id, created_at, idempotency_key_hash, business_name, contact_name,
                phone_whatsapp, city, salon_type, consent, chair_count, specialization,
                current_brands_used, monthly_spend_range, email, message,
                page_url_initial, page_url_current, user_agent, ip_address
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(lead.id.to_string())
        .bind(to_rfc3339(lead.created_at))
        .bind(&lead.idempotency_key_hash)
        .bind(&lead.business_name)
        .bind(&lead.contact_name)
        .bind(&lead.phone_whatsapp)
        .bind(&lead.city)
        .bind(lead.salon_type.as_str())
        .bind(lead.consent as i64)
        .bind(lead.chair_count)
        .bind(&lead.specialization)
        .bind(&lead.current_brands_used)
        .bind(&lead.monthly_spend_range)
        .bind(&lead.email)
        .bind(&lead.message)
        .bind(&lead.page_url_initial)
        .bind(&lead.page_url_current)
        .bind(&lead.user_agent)
        .bind(&lead.ip_address)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(lead),
            // A concurrent insert with the same hash lost the race; fetch the winner.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                if let Some(hash) = &lead.idempotency_key_hash {
                    let row = sqlx::query("SELECT * FROM leads WHERE idempotency_key_hash = ?")
                        .bind(hash)
                        .fetch_one(&self.pool)
                        .await?;
                    Ok(lead_from_row(&row))
                } else {
                    Err(StoreError::Database("unexpected unique violation".into()))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Lead, StoreError> {
        let row = sqlx::query("SELECT * FROM leads WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(lead_from_row(&row))
    }

    async fn list(&self, limit: i64, before: Option<DateTime<Utc>>) -> Result<Vec<Lead>, StoreError> {
        let capped = limit.clamp(1, 5000);
        let rows = match before {
            Some(b) => {
                sqlx::query("SELECT * FROM leads WHERE created_at < ? ORDER BY created_at DESC LIMIT ?")
                    .bind(to_rfc3339(b))
                    .bind(capped)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM leads ORDER BY created_at DESC LIMIT ?")
                    .bind(capped)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(lead_from_row).collect())
    }
}

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
    async fn enqueue(&self, lead_id: Uuid, channel: Channel) -> Result<(), StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO lead_notifications
                (id, lead_id, channel, status, attempts, next_attempt_at, last_error, created_at, updated_at, sent_at)
            VALUES (?, ?, ?, 'pending', 0, ?, '', ?, ?, NULL)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(lead_id.to_string())
        .bind(channel.as_str())
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn claim_batch(&self, limit: i64) -> Result<Vec<Notification>, StoreError> {
        let now = Utc::now();
        let stuck_before = now - Duration::minutes(STUCK_PROCESSING_THRESHOLD_MINUTES);

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM lead_notifications
            WHERE (status = 'pending' AND next_attempt_at <= ?)
               OR (status = 'processing' AND updated_at <= ?)
            ORDER BY next_attempt_at ASC, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(stuck_before))
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            sqlx::query("UPDATE lead_notifications SET status = 'processing', updated_at = ? WHERE id = ?")
                .bind(to_rfc3339(now))
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            let mut n = notification_from_row(row);
            n.status = Status::Processing;
            n.updated_at = now;
            claimed.push(n);
        }

        tx.commit().await?;
        Ok(claimed)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query("UPDATE lead_notifications SET status = 'sent', sent_at = ?, updated_at = ? WHERE id = ?")
            .bind(to_rfc3339(now))
            .bind(to_rfc3339(now))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE lead_notifications SET status = 'pending', attempts = ?, next_attempt_at = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(attempts)
        .bind(to_rfc3339(next_attempt_at))
        .bind(last_error)
        .bind(to_rfc3339(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: i32, last_error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE lead_notifications SET status = 'failed', attempts = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(attempts)
        .bind(last_error)
        .bind(to_rfc3339(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, query: NotificationListQuery) -> Result<Vec<Notification>, StoreError> {
        let mut sql = String::from("SELECT * FROM lead_notifications WHERE 1=1");
        if query.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if query.channel.is_some() {
            sql.push_str(" AND channel = ?");
        }
        if query.lead_id.is_some() {
            sql.push_str(" AND lead_id = ?");
        }
        if query.before.is_some() {
            sql.push_str(" AND created_at < ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut q = sqlx::query(&sql);
        if let Some(s) = query.status {
            q = q.bind(s.as_str());
        }
        if let Some(c) = query.channel {
            q = q.bind(c.as_str());
        }
        if let Some(id) = query.lead_id {
            q = q.bind(id.to_string());
        }
        if let Some(b) = query.before {
            q = q.bind(to_rfc3339(b));
        }
        q = q.bind(query.capped_limit());

        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(notification_from_row).collect())
    }

    async fn stats(&self) -> Result<NotificationStats, StoreError> {
        let now = Utc::now();
        let count_rows = sqlx::query("SELECT status, COUNT(*) as n FROM lead_notifications GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts_by_status = std::collections::HashMap::new();
        for st in ["pending", "processing", "sent", "failed"] {
            counts_by_status.insert(st.to_string(), 0i64);
        }
        for row in &count_rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            counts_by_status.insert(status, n);
        }

        let ready_row = sqlx::query(
            "SELECT COUNT(*) as n, MIN(created_at) as oldest FROM lead_notifications \
             WHERE status = 'pending' AND next_attempt_at <= ?",
        )
        .bind(to_rfc3339(now))
        .fetch_one(&self.pool)
        .await?;
        let pending_ready_count: i64 = ready_row.get("n");
        let oldest: Option<String> = ready_row.get("oldest");

        let delayed_row = sqlx::query(
            "SELECT COUNT(*) as n FROM lead_notifications WHERE status = 'pending' AND next_attempt_at > ?",
        )
        .bind(to_rfc3339(now))
        .fetch_one(&self.pool)
        .await?;
        let pending_delayed_count: i64 = delayed_row.get("n");

        Ok(NotificationStats {
            counts_by_status,
            pending_ready_count,
            pending_delayed_count,
            oldest_ready_pending_created_at: oldest.map(|s| parse_ts(&s)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lead_domain::LeadInput;

    async fn setup() -> (SqliteLeadRepository, SqliteNotificationRepository) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        (
            SqliteLeadRepository::new(pool.clone()),
            SqliteNotificationRepository::new(pool),
        )
    }

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
    async fn create_then_get_round_trips() {
        let (leads, _) = setup().await;
        let created = leads.create(sample_input(), SalonType::Salon).await.unwrap();
        let fetched = leads.get_by_id(created.id).await.unwrap();
        assert_eq!(created.id, fetched.id);
        assert_eq!(fetched.business_name, "Biz");
    }

    #[tokio::test]
    async fn create_is_idempotent_by_hash() {
        let (leads, _) = setup().await;
        let mut input = sample_input();
        input.idempotency_key_hash = Some("deadbeef".into());
        let first = leads.create(input.clone(), SalonType::Salon).await.unwrap();
        let second = leads.create(input, SalonType::Salon).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn enqueue_claim_mark_sent_cycle() {
        let (leads, notifications) = setup().await;
        let lead = leads.create(sample_input(), SalonType::Salon).await.unwrap();
        notifications.enqueue(lead.id, Channel::Email).await.unwrap();
        notifications.enqueue(lead.id, Channel::Email).await.unwrap();

        let claimed = notifications.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 1, "duplicate enqueue must not create a second row");

        notifications.mark_sent(claimed[0].id).await.unwrap();
        let rows = notifications
            .list(NotificationListQuery {
                lead_id: Some(lead.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows[0].status, Status::Sent);
    }
}
