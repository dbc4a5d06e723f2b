//! The Webhook Dispatcher (§4.5): invoked inline by the email worker right
//! after a job reaches a terminal state. Decides whether a webhook is owed at
//! all, snapshots the delivery URL, and hands the delivery off to the
//! `webhook_delivery` queue — the actual HTTP call belongs to the Webhook
//! Worker (§4.6), which runs as a separate process with its own retry loop.

use mailer_common::models::{Application, EmailJob, WebhookPayload};
use mailer_common::queue::{Broker, WEBHOOK_QUEUE};
use mailer_common::store::{NewWebhookDelivery, Store};
use time::OffsetDateTime;
use tracing::{error, info};

/// `email.sent` or `email.failed` (§4.5 step 1). Webhooks are not dispatched
/// for intermediate `retry_pending` transitions, only the final outcome.
pub fn event_type_for(job: &EmailJob) -> &'static str {
    if job.status == "sent" {
        "email.sent"
    } else {
        "email.failed"
    }
}

/// Queue a webhook delivery for `job`'s terminal outcome if the owning
/// application has webhooks enabled and subscribed to this event type.
/// No-op (not an error) if webhooks aren't configured — most tenants never
/// opt in.
pub async fn dispatch_if_subscribed(
    store: &Store,
    broker: &Broker,
    application: &Application,
    service_name: &str,
    job: &EmailJob,
) {
    if !application.webhook_enabled {
        return;
    }
    let Some(webhook_url) = application.webhook_url.as_deref() else {
        return;
    };

    let event_type = event_type_for(job);
    if !application.webhook_events.iter().any(|e| e == event_type) {
        return;
    }

    let payload = WebhookPayload {
        event: event_type.to_string(),
        timestamp: OffsetDateTime::now_utc(),
        job_id: job.id,
        tenant_id: job.tenant_id,
        application_id: job.application_id,
        service_name: service_name.to_string(),
        to_email: job.to_email.clone(),
        subject: job.subject.clone(),
        status: job.status.clone(),
        sent_at: job.sent_at,
        error_category: job.error_category.clone(),
        error_message: job.error_message.clone(),
        retry_count: job.retry_count,
    };

    let payload_json = match serde_json::to_value(&payload) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, job_id = %job.id, "failed to serialize webhook payload");
            return;
        }
    };

    let delivery = match store
        .insert_webhook_delivery(NewWebhookDelivery {
            email_job_id: job.id,
            application_id: application.id,
            tenant_id: application.tenant_id,
            webhook_url: webhook_url.to_string(),
            event_type: event_type.to_string(),
            payload: payload_json,
            max_retries: 3,
        })
        .await
    {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, job_id = %job.id, "failed to persist webhook delivery");
            return;
        }
    };

    if let Err(e) = broker.enqueue(WEBHOOK_QUEUE, &delivery.id).await {
        error!(error = %e, delivery_id = %delivery.id, "failed to enqueue webhook delivery");
        let _ = store
            .mark_webhook_delivery_failed_to_queue(delivery.id, &format!("failed to enqueue: {e}"))
            .await;
        return;
    }

    let _ = store.mark_webhook_requested(job.id).await;
    info!(job_id = %job.id, delivery_id = %delivery.id, event = event_type, "webhook delivery queued");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailer_common::models::JobStatus;

    fn test_job(status: &str) -> EmailJob {
        EmailJob {
            id: uuid::Uuid::now_v7(),
            tenant_id: uuid::Uuid::now_v7(),
            application_id: uuid::Uuid::now_v7(),
            service_id: uuid::Uuid::now_v7(),
            to_email: "alice@example.com".to_string(),
            subject: "hi".to_string(),
            body: "hi".to_string(),
            status: status.to_string(),
            sent_at: None,
            processing_started_at: None,
            error_message: None,
            error_category: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            webhook_requested: false,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn sent_jobs_dispatch_the_sent_event() {
        assert_eq!(event_type_for(&test_job(JobStatus::Sent.as_str())), "email.sent");
    }

    #[test]
    fn failed_jobs_dispatch_the_failed_event() {
        assert_eq!(event_type_for(&test_job(JobStatus::Failed.as_str())), "email.failed");
    }
}
