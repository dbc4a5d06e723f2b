//! Flat, id-keyed record types for every entity in §3 of the spec. The
//! original ORM graph is bidirectional (Application<->Tenant,
//! EmailService<->ServiceConfiguration<->Application, Job<->WebhookDelivery);
//! here associations are resolved lazily through [`crate::store::Store`]
//! lookups and no type stores a back-pointer (§9 "Cyclic references").

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Application {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub api_key: String,
    pub webhook_url: Option<String>,
    pub webhook_api_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_enabled: bool,
    pub webhook_events: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailService {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub status: String,
    pub template_id: Option<Uuid>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceConfiguration {
    pub id: Uuid,
    pub email_service_id: Uuid,
    pub application_id: Uuid,
    pub smtp_configuration_id: Uuid,
    pub is_active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SmtpConfiguration {
    pub id: Uuid,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub password_wrapped: String,
    pub use_tls: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub subject_template: String,
    pub body_template: String,
}

/// `EmailJob.status` (§3). Stored as text; this type is the in-process view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Sent,
    Failed,
    RetryPending,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
            JobStatus::RetryPending => "retry_pending",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "sent" => Ok(JobStatus::Sent),
            "failed" => Ok(JobStatus::Failed),
            "retry_pending" => Ok(JobStatus::RetryPending),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EmailJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub application_id: Uuid,
    pub service_id: Uuid,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub sent_at: Option<OffsetDateTime>,
    pub processing_started_at: Option<OffsetDateTime>,
    pub error_message: Option<String>,
    pub error_category: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<OffsetDateTime>,
    pub webhook_requested: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EmailLog {
    pub id: Uuid,
    pub job_id: Uuid,
    pub status: String,
    pub response_code: Option<i32>,
    pub response_message: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub email_job_id: Uuid,
    pub application_id: Uuid,
    pub tenant_id: Uuid,
    pub webhook_url: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<OffsetDateTime>,
    pub last_response_code: Option<i32>,
    pub last_response_body: Option<String>,
    pub last_error: Option<String>,
    pub delivered_at: Option<OffsetDateTime>,
}

/// The body POSTed to a subscriber's webhook URL (§4.5 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub timestamp: OffsetDateTime,
    pub job_id: Uuid,
    pub tenant_id: Uuid,
    pub application_id: Uuid,
    pub service_name: String,
    pub to_email: String,
    pub subject: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: i32,
}
