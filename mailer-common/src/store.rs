//! The Persistence Store (§2 item 1): durable storage for jobs, logs, and
//! webhook-delivery records, plus read-through lookups for applications,
//! services, templates, and SMTP credentials. Associations are resolved
//! lazily through these lookups; no type stores a back-pointer (§9).

use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Application, EmailJob, EmailService, EmailTemplate, ServiceConfiguration,
    SmtpConfiguration, WebhookDelivery,
};

/// The error message cap noted in SPEC_FULL.md §4, by symmetry with
/// WebhookDelivery's existing 1024-byte `last_response_body` cap.
const ERROR_MESSAGE_CAP: usize = 2048;

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_owned()
    } else {
        s.chars().take(max).collect()
    }
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

pub struct NewEmailJob {
    pub tenant_id: Uuid,
    pub application_id: Uuid,
    pub service_id: Uuid,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub max_retries: i32,
}

pub struct NewWebhookDelivery {
    pub email_job_id: Uuid,
    pub application_id: Uuid,
    pub tenant_id: Uuid,
    pub webhook_url: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub max_retries: i32,
}

/// An `EmailJob` row held under `SELECT ... FOR UPDATE SKIP LOCKED` (§4.2
/// step 1). Dropping this without calling [`LockedJob::commit`] rolls the
/// transaction back, releasing the lock without side effects.
pub struct LockedJob {
    tx: Transaction<'static, Postgres>,
    pub job: EmailJob,
}

impl LockedJob {
    /// Transition `queued`/`retry_pending` -> `processing` (§4.2 step 4) and
    /// release the lock.
    pub async fn mark_processing(mut self, now: OffsetDateTime) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'processing', processing_started_at = $2, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(self.job.id)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        Ok(())
    }

    /// Release the lock without any state change (used for the idempotency
    /// and stale-processing gates of §4.2 steps 2-3, which return a no-op).
    pub async fn release(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// A `WebhookDelivery` row held under the analogous lock (§3 "Ownership").
pub struct LockedWebhookDelivery {
    tx: Transaction<'static, Postgres>,
    pub delivery: WebhookDelivery,
}

impl LockedWebhookDelivery {
    pub async fn release(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ---- read-through lookups (§4.1 steps 1-5), never locked ----

    pub async fn application_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Application>, StoreError> {
        let app = sqlx::query_as::<_, Application>(
            "SELECT * FROM applications WHERE api_key = $1",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(app)
    }

    pub async fn application_by_id(&self, id: Uuid) -> Result<Option<Application>, StoreError> {
        let app = sqlx::query_as::<_, Application>("SELECT * FROM applications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(app)
    }

    pub async fn active_email_service(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<EmailService>, StoreError> {
        let service = sqlx::query_as::<_, EmailService>(
            "SELECT * FROM email_services WHERE tenant_id = $1 AND name = $2 AND status = 'active'",
        )
        .bind(tenant_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(service)
    }

    pub async fn email_service_by_id(&self, id: Uuid) -> Result<Option<EmailService>, StoreError> {
        let service = sqlx::query_as::<_, EmailService>("SELECT * FROM email_services WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(service)
    }

    pub async fn active_service_configuration(
        &self,
        email_service_id: Uuid,
        application_id: Uuid,
    ) -> Result<Option<ServiceConfiguration>, StoreError> {
        let config = sqlx::query_as::<_, ServiceConfiguration>(
            r#"
            SELECT * FROM service_configurations
            WHERE email_service_id = $1 AND application_id = $2 AND is_active = true
            "#,
        )
        .bind(email_service_id)
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(config)
    }

    pub async fn smtp_configuration(
        &self,
        id: Uuid,
    ) -> Result<Option<SmtpConfiguration>, StoreError> {
        let config = sqlx::query_as::<_, SmtpConfiguration>(
            "SELECT * FROM smtp_configurations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(config)
    }

    /// Resolve SMTP config for a job via Service+Application -> Config (§4.2
    /// step 5's lookup path).
    pub async fn smtp_configuration_for_job(
        &self,
        service_id: Uuid,
        application_id: Uuid,
    ) -> Result<Option<SmtpConfiguration>, StoreError> {
        let Some(config) = self
            .active_service_configuration(service_id, application_id)
            .await?
        else {
            return Ok(None);
        };
        self.smtp_configuration(config.smtp_configuration_id).await
    }

    pub async fn template_by_tenant_name(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<EmailTemplate>, StoreError> {
        let template = sqlx::query_as::<_, EmailTemplate>(
            "SELECT * FROM email_templates WHERE tenant_id = $1 AND name = $2",
        )
        .bind(tenant_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(template)
    }

    // ---- intake (§4.1 steps 7-9) ----

    pub async fn insert_job(&self, new: NewEmailJob) -> Result<EmailJob, StoreError> {
        let job = sqlx::query_as::<_, EmailJob>(
            r#"
            INSERT INTO email_jobs (
                id, tenant_id, application_id, service_id, to_email, subject, body,
                status, retry_count, max_retries, webhook_requested, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued', 0, $8, false, now(), now())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.tenant_id)
        .bind(new.application_id)
        .bind(new.service_id)
        .bind(new.to_email)
        .bind(new.subject)
        .bind(new.body)
        .bind(new.max_retries)
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    /// Direct `queued -> failed` transition permitted only for enqueue-side
    /// failures (§4.1 step 8, §4.2 state machine note).
    pub async fn mark_job_enqueue_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'failed', error_category = 'system', error_message = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(truncate(error_message, ERROR_MESSAGE_CAP))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- status API (§4.9 / §6) ----

    pub async fn get_job(&self, id: Uuid) -> Result<Option<EmailJob>, StoreError> {
        let job = sqlx::query_as::<_, EmailJob>("SELECT * FROM email_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get_webhook_delivery_for_job(
        &self,
        job_id: Uuid,
    ) -> Result<Option<WebhookDelivery>, StoreError> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            "SELECT * FROM webhook_deliveries WHERE email_job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(delivery)
    }

    // ---- email worker (§4.2) ----

    /// `SELECT job WHERE id = job_id FOR UPDATE SKIP LOCKED` (§4.2 step 1).
    /// Returns `None` if the row is locked by another worker or doesn't
    /// exist; callers should treat both the same: return without acking the
    /// broker-level task change (the broker's own redelivery will retry).
    pub async fn try_lock_job(&self, job_id: Uuid) -> Result<Option<LockedJob>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, EmailJob>(
            "SELECT * FROM email_jobs WHERE id = $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        match job {
            Some(job) => Ok(Some(LockedJob { tx, job })),
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    pub async fn insert_log(
        &self,
        job_id: Uuid,
        status: &str,
        response_code: Option<i32>,
        response_message: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO email_logs (id, job_id, status, response_code, response_message, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(job_id)
        .bind(status)
        .bind(response_code)
        .bind(response_message.map(|m| truncate(m, ERROR_MESSAGE_CAP)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal `sent` (§4.2 step 7, "Success"). Idempotency gate relies on
    /// `sent_at` being non-null after this call.
    pub async fn finalize_sent(&self, job_id: Uuid, sent_at: OffsetDateTime) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'sent', sent_at = $2, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal `failed` with the given category (`permanent`, `temporary`
    /// on exhaustion, or `system`).
    pub async fn finalize_failed(
        &self,
        job_id: Uuid,
        category: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'failed', error_category = $2, error_message = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(category)
        .bind(truncate(message, ERROR_MESSAGE_CAP))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Retryable temporary failure (§4.2 step 7): bump `retry_count`, move
    /// to `retry_pending`, and record the computed backoff deadline.
    pub async fn finalize_retry_pending(
        &self,
        job_id: Uuid,
        retry_count: i32,
        next_retry_at: OffsetDateTime,
        message: &str,
    ) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'retry_pending', retry_count = $2, next_retry_at = $3,
                error_category = 'temporary', error_message = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(truncate(message, ERROR_MESSAGE_CAP))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_webhook_requested(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE email_jobs SET webhook_requested = true, updated_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- webhook dispatcher/worker (§4.5, §4.6) ----

    pub async fn insert_webhook_delivery(
        &self,
        new: NewWebhookDelivery,
    ) -> Result<WebhookDelivery, StoreError> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            INSERT INTO webhook_deliveries (
                id, email_job_id, application_id, tenant_id, webhook_url, event_type,
                payload, status, retry_count, max_retries
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 0, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.email_job_id)
        .bind(new.application_id)
        .bind(new.tenant_id)
        .bind(new.webhook_url)
        .bind(new.event_type)
        .bind(new.payload)
        .bind(new.max_retries)
        .fetch_one(&self.pool)
        .await?;
        Ok(delivery)
    }

    pub async fn mark_webhook_delivery_failed_to_queue(
        &self,
        delivery_id: Uuid,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE webhook_deliveries SET status = 'failed', last_error = $2 WHERE id = $1",
        )
        .bind(delivery_id)
        .bind(truncate(error, ERROR_MESSAGE_CAP))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn try_lock_webhook_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<LockedWebhookDelivery>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            "SELECT * FROM webhook_deliveries WHERE id = $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(delivery_id)
        .fetch_optional(&mut *tx)
        .await?;

        match delivery {
            Some(delivery) => Ok(Some(LockedWebhookDelivery { tx, delivery })),
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    pub async fn finalize_webhook_delivered(
        &self,
        delivery_id: Uuid,
        response_code: i32,
        response_body: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'delivered', delivered_at = now(),
                last_response_code = $2, last_response_body = $3
            WHERE id = $1
            "#,
        )
        .bind(delivery_id)
        .bind(response_code)
        .bind(truncate(response_body, 1024))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finalize_webhook_failed(
        &self,
        delivery_id: Uuid,
        last_error: &str,
        response_code: Option<i32>,
        response_body: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed', last_error = $2, last_response_code = $3, last_response_body = $4
            WHERE id = $1
            "#,
        )
        .bind(delivery_id)
        .bind(truncate(last_error, ERROR_MESSAGE_CAP))
        .bind(response_code)
        .bind(response_body.map(|b| truncate(b, 1024)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finalize_webhook_retry_pending(
        &self,
        delivery_id: Uuid,
        retry_count: i32,
        next_retry_at: OffsetDateTime,
        last_error: &str,
        response_code: Option<i32>,
        response_body: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET retry_count = $2, next_retry_at = $3, last_error = $4,
                last_response_code = $5, last_response_body = $6
            WHERE id = $1
            "#,
        )
        .bind(delivery_id)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(truncate(last_error, ERROR_MESSAGE_CAP))
        .bind(response_code)
        .bind(response_body.map(|b| truncate(b, 1024)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- janitor (§9 "Outbox ordering") ----

    /// Jobs stuck in `queued` older than `older_than`: either their enqueue
    /// task was lost (narrow window between commit and enqueue failing
    /// silently) or a broker outage swallowed the task.
    pub async fn find_stale_queued_jobs(
        &self,
        older_than: Duration,
    ) -> Result<Vec<EmailJob>, StoreError> {
        let cutoff = OffsetDateTime::now_utc() - older_than;
        let jobs = sqlx::query_as::<_, EmailJob>(
            "SELECT * FROM email_jobs WHERE status = 'queued' AND created_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// Jobs stuck in `processing` past the stale-processing window (§4.2
    /// step 3) with no worker left holding them — the janitor demotes them
    /// back to `queued` so a future poll re-enqueues a task.
    pub async fn find_stuck_processing_jobs(
        &self,
        older_than: Duration,
    ) -> Result<Vec<EmailJob>, StoreError> {
        let cutoff = OffsetDateTime::now_utc() - older_than;
        let jobs = sqlx::query_as::<_, EmailJob>(
            r#"
            SELECT * FROM email_jobs
            WHERE status = 'processing' AND processing_started_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn reset_stuck_job_to_queued(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'queued', processing_started_at = NULL, updated_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
