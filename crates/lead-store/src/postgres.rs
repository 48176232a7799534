//! Postgres-backed repositories. `claim_batch` uses `FOR UPDATE SKIP
//! LOCKED` inside a CTE so concurrent workers never contend on the same
//! row and never block each other on a row someone else is already
//! claiming.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lead_domain::{
    Channel, Lead, LeadInput, Notification, NotificationListQuery, NotificationStats, SalonType,
    Status,
};
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::{LeadRepository, NotificationRepository, StoreError, STUCK_PROCESSING_THRESHOLD_MINUTES};

pub struct PostgresLeadRepository {
    pool: PgPool,
}

pub struct PostgresNotificationRepository {
    pool: PgPool,
}

pub async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id UUID PRIMARY KEY,
            created_at TIMESTAMPTZ NOT NULL,
            idempotency_key_hash TEXT,
            business_name TEXT NOT NULL,
            contact_name TEXT NOT NULL,
            phone_whatsapp TEXT NOT NULL,
            city TEXT NOT NULL,
            salon_type TEXT NOT NULL,
            consent BOOLEAN NOT NULL,
            chair_count BIGINT,
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
            id UUID PRIMARY KEY,
            lead_id UUID NOT NULL,
            channel TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TIMESTAMPTZ NOT NULL,
            last_error TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            sent_at TIMESTAMPTZ
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

fn salon_type_from_str(raw: &str) -> SalonType {
    match raw {
        "BARBER" => SalonType::Barber,
        "BRIDAL" => SalonType::Bridal,
        "UNISEX" => SalonType::Unisex,
        "OTHER" => SalonType::Other,
        _ => SalonType::Salon,
    }
}

fn lead_from_row(row: &sqlx::postgres::PgRow) -> Lead {
    let salon_type_raw: String = row.get("salon_type");
    Lead {
        id: row.get("id"),
        created_at: row.get("created_at"),
        idempotency_key_hash: row.get("idempotency_key_hash"),
        business_name: row.get("business_name"),
        contact_name: row.get("contact_name"),
        phone_whatsapp: row.get("phone_whatsapp"),
        city: row.get("city"),
        salon_type: salon_type_from_str(&salon_type_raw),
        consent: row.get("consent"),
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

fn notification_from_row(row: &sqlx::postgres::PgRow) -> Notification {
    let channel_raw: String = row.get("channel");
    let status_raw: String = row.get("status");
    Notification {
        id: row.get("id"),
        lead_id: row.get("lead_id"),
        channel: Channel::parse(&channel_raw).unwrap_or(Channel::Email),
        status: Status::parse(&status_raw).unwrap_or(Status::Pending),
        attempts: row.get("attempts"),
        next_attempt_at: row.get("next_attempt_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        sent_at: row.get("sent_at"),
    }
}

impl PostgresLeadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PostgresNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadRepository for PostgresLeadRepository {
    async fn create(&self, input: LeadInput, salon_type: SalonType) -> Result<Lead, StoreError> {
        if let Some(hash) = &input.idempotency_key_hash {
            let existing = sqlx::query("SELECT * FROM leads WHERE idempotency_key_hash = $1")
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (idempotency_key_hash) WHERE idempotency_key_hash IS NOT NULL DO NOTHING
            "#,
        )
        .bind(lead.id)
        .bind(lead.created_at)
        .bind(&lead.idempotency_key_hash)
        .bind(&lead.business_name)
        .bind(&lead.contact_name)
        .bind(&lead.phone_whatsapp)
        .bind(&lead.city)
        .bind(lead.salon_type.as_str())
        .bind(lead.consent)
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
        .await?;

        if result.rows_affected() == 1 {
            return Ok(lead);
        }

        // ON CONFLICT DO NOTHING means we lost a concurrent race; the winner
        // is already there under the same hash.
        if let Some(hash) = &lead.idempotency_key_hash {
            let row = sqlx::query("SELECT * FROM leads WHERE idempotency_key_hash = $1")
                .bind(hash)
                .fetch_one(&self.pool)
                .await?;
            Ok(lead_from_row(&row))
        } else {
            Err(StoreError::Database("insert affected no rows".into()))
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Lead, StoreError> {
        let row = sqlx::query("SELECT * FROM leads WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(lead_from_row(&row))
    }

    async fn list(&self, limit: i64, before: Option<DateTime<Utc>>) -> Result<Vec<Lead>, StoreError> {
        let capped = limit.clamp(1, 5000);
        let rows = match before {
            Some(b) => {
                sqlx::query("SELECT * FROM leads WHERE created_at < $1 ORDER BY created_at DESC LIMIT $2")
                    .bind(b)
                    .bind(capped)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM leads ORDER BY created_at DESC LIMIT $1")
                    .bind(capped)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(lead_from_row).collect())
    }
}

#[async_trait]
impl NotificationRepository for PostgresNotificationRepository {
    async fn enqueue(&self, lead_id: Uuid, channel: Channel) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO lead_notifications
                (id, lead_id, channel, status, attempts, next_attempt_at, last_error, created_at, updated_at, sent_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, '', $5, $6, NULL)
            ON CONFLICT (lead_id, channel) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(lead_id)
        .bind(channel.as_str())
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The CTE selects and locks eligible rows with `FOR UPDATE SKIP
    /// LOCKED` so a row another worker is already claiming this instant is
    /// silently excluded rather than blocking this query; the outer
    /// `UPDATE ... RETURNING` flips them to `processing` in the same
    /// statement, closing the claim/read race entirely.
    async fn claim_batch(&self, limit: i64) -> Result<Vec<Notification>, StoreError> {
        let now = Utc::now();
        let stuck_before = now - chrono::Duration::minutes(STUCK_PROCESSING_THRESHOLD_MINUTES);

        let rows = sqlx::query(
            r#"
            WITH cte AS (
                SELECT id FROM lead_notifications
                WHERE (status = 'pending' AND next_attempt_at <= $1)
                   OR (status = 'processing' AND updated_at <= $2)
                ORDER BY next_attempt_at ASC, created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE lead_notifications n
            SET status = 'processing', updated_at = $1
            FROM cte
            WHERE n.id = cte.id
            RETURNING n.*
            "#,
        )
        .bind(now)
        .bind(stuck_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(notification_from_row).collect())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query("UPDATE lead_notifications SET status = 'sent', sent_at = $1, updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
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
            "UPDATE lead_notifications SET status = 'pending', attempts = $1, next_attempt_at = $2, last_error = $3, updated_at = $4 WHERE id = $5",
        )
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(last_error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: i32, last_error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE lead_notifications SET status = 'failed', attempts = $1, last_error = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(attempts)
        .bind(last_error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, query: NotificationListQuery) -> Result<Vec<Notification>, StoreError> {
        let mut sql = String::from("SELECT * FROM lead_notifications WHERE 1=1");
        let mut idx = 1;
        if query.status.is_some() {
            sql.push_str(&format!(" AND status = ${idx}"));
            idx += 1;
        }
        if query.channel.is_some() {
            sql.push_str(&format!(" AND channel = ${idx}"));
            idx += 1;
        }
        if query.lead_id.is_some() {
            sql.push_str(&format!(" AND lead_id = ${idx}"));
            idx += 1;
        }
        if query.before.is_some() {
            sql.push_str(&format!(" AND created_at < ${idx}"));
            idx += 1;
        }
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ${idx}"));

        let mut q = sqlx::query(&sql);
        if let Some(s) = query.status {
            q = q.bind(s.as_str());
        }
        if let Some(c) = query.channel {
            q = q.bind(c.as_str());
        }
        if let Some(id) = query.lead_id {
            q = q.bind(id);
        }
        if let Some(b) = query.before {
            q = q.bind(b);
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
             WHERE status = 'pending' AND next_attempt_at <= $1",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let pending_ready_count: i64 = ready_row.get("n");
        let oldest: Option<DateTime<Utc>> = ready_row.get("oldest");

        let delayed_row = sqlx::query(
            "SELECT COUNT(*) as n FROM lead_notifications WHERE status = 'pending' AND next_attempt_at > $1",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let pending_delayed_count: i64 = delayed_row.get("n");

        Ok(NotificationStats {
            counts_by_status,
            pending_ready_count,
            pending_delayed_count,
            oldest_ready_pending_created_at: oldest,
        })
    }
}

// No co-located tests here: exercising this module needs a live Postgres
// instance. Integration coverage lives in the in-memory and SQLite
// implementations, which exercise the same trait contract.
