//! The Webhook Worker (§4.6): dequeues `webhook_delivery` tasks, locks the
//! delivery row, re-reads the owning application's current signing secret
//! and API key (so a credential rotated after the delivery was queued still
//! takes effect), POSTs the snapshotted payload, and finalizes the result.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use health::HealthHandle;
use mailer_common::queue::{Broker, WEBHOOK_QUEUE};
use mailer_common::retry::RetryPolicy;
use mailer_common::store::Store;
use mailer_common::webhook_sign;
use time::{Duration, OffsetDateTime};
use tokio::sync::Semaphore;
use tracing::{error, info};
use uuid::Uuid;

use crate::dns::PublicIpv4Resolver;
use crate::error::WorkerError;

const RESPONSE_BODY_CAP: usize = 1024;

pub struct WebhookWorker {
    store: Store,
    broker: Broker,
    client: reqwest::Client,
    poll_interval: StdDuration,
    visibility_timeout: Duration,
    max_concurrent: usize,
    retry_policy: RetryPolicy,
    liveness: HealthHandle,
}

impl WebhookWorker {
    pub fn new(
        store: Store,
        broker: Broker,
        request_timeout: StdDuration,
        poll_interval: StdDuration,
        visibility_timeout: Duration,
        max_concurrent: usize,
        liveness: HealthHandle,
    ) -> Self {
        // `<product>-Webhook/1.0` per §4.6 step 3 / §6 "Webhook outbound".
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("Mailer-Webhook/1.0")
            .dns_resolver(std::sync::Arc::new(PublicIpv4Resolver))
            .build()
            .expect("failed to construct reqwest client for webhook worker");

        Self {
            store,
            broker,
            client,
            poll_interval,
            visibility_timeout,
            max_concurrent,
            retry_policy: RetryPolicy::webhook_default(),
            liveness,
        }
    }

    pub async fn run(&self) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            let task = match self.broker.dequeue(WEBHOOK_QUEUE, self.visibility_timeout).await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "failed to dequeue webhook_delivery task");
                    continue;
                }
            };

            let delivery_id: Uuid = match task.payload_as() {
                Ok(id) => id,
                Err(e) => {
                    error!(error = %e, task_id = %task.id, "malformed webhook_delivery task payload");
                    let _ = self.broker.nack_fail(task.id).await;
                    continue;
                }
            };

            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let store = self.store.clone();
            let broker = self.broker.clone();
            let client = self.client.clone();
            let retry_policy = self.retry_policy;
            let task_id = task.id;

            tokio::spawn(async move {
                let outcome = process_delivery(&store, &client, delivery_id, &retry_policy).await;
                match outcome {
                    Ok(Outcome::Done) => {
                        if let Err(e) = broker.ack(task_id).await {
                            error!(error = %e, task_id = %task_id, "failed to ack webhook_delivery task");
                        }
                    }
                    Ok(Outcome::Defer(delay)) => {
                        if let Err(e) = broker.nack_retry(task_id, delay).await {
                            error!(error = %e, task_id = %task_id, "failed to defer webhook_delivery task");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, task_id = %task_id, delivery_id = %delivery_id, "error delivering webhook");
                        let _ = broker.nack_retry(task_id, Duration::seconds(15)).await;
                    }
                }
                drop(permit);
            });
        }
    }
}

enum Outcome {
    Done,
    Defer(Duration),
}

async fn process_delivery(
    store: &Store,
    client: &reqwest::Client,
    delivery_id: Uuid,
    retry_policy: &RetryPolicy,
) -> Result<Outcome, WorkerError> {
    metrics::counter!("webhook_deliveries_dequeued_total").increment(1);
    let started_at = std::time::Instant::now();
    let outcome = process_delivery_inner(store, client, delivery_id, retry_policy).await;
    metrics::histogram!("webhook_delivery_duration_seconds")
        .record(started_at.elapsed().as_secs_f64());
    outcome
}

async fn process_delivery_inner(
    store: &Store,
    client: &reqwest::Client,
    delivery_id: Uuid,
    retry_policy: &RetryPolicy,
) -> Result<Outcome, WorkerError> {
    let Some(locked) = store.try_lock_webhook_delivery(delivery_id).await? else {
        return Ok(Outcome::Defer(Duration::seconds(5)));
    };

    if locked.delivery.delivered_at.is_some() || locked.delivery.status == "delivered" {
        locked.release().await?;
        return Ok(Outcome::Done);
    }
    if locked.delivery.status == "failed" {
        locked.release().await?;
        return Ok(Outcome::Done);
    }

    let delivery = locked.delivery.clone();
    locked.release().await?;

    let Some(application) = store.application_by_id(delivery.application_id).await? else {
        store
            .finalize_webhook_failed(delivery.id, "owning application no longer exists", None, None)
            .await?;
        return Ok(Outcome::Done);
    };

    // `Value::to_string()` serializes via its `Display` impl and cannot fail.
    let body = delivery.payload.to_string();
    let timestamp = OffsetDateTime::now_utc().unix_timestamp();

    let mut request = client.post(&delivery.webhook_url).header("Content-Type", "application/json");
    if let Some(api_key) = application.webhook_api_key.as_deref() {
        request = request.header("X-API-Key", api_key);
    }
    if let Some(secret) = application.webhook_secret.as_deref() {
        let signature = webhook_sign::sign(secret, timestamp, &body);
        request = request
            .header("X-Webhook-Signature", signature)
            .header("X-Timestamp", timestamp.to_string());
    }

    let send_result = request.body(body).send().await;

    match send_result {
        Ok(response) => {
            let status = response.status().as_u16();
            let response_body = response.text().await.unwrap_or_default();
            let truncated = truncate(&response_body, RESPONSE_BODY_CAP);

            if !mailer_common::classify::webhook_status_is_retryable(status) {
                store
                    .finalize_webhook_delivered(delivery.id, status as i32, &truncated)
                    .await?;
                metrics::counter!("webhook_deliveries_delivered_total").increment(1);
                info!(delivery_id = %delivery.id, status, "webhook delivered");
                Ok(Outcome::Done)
            } else {
                retry_or_fail(store, &delivery, retry_policy, &format!("HTTP {status}"), Some(status as i32), Some(&truncated)).await
            }
        }
        Err(e) => {
            retry_or_fail(store, &delivery, retry_policy, &e.to_string(), None, None).await
        }
    }
}

async fn retry_or_fail(
    store: &Store,
    delivery: &mailer_common::models::WebhookDelivery,
    retry_policy: &RetryPolicy,
    message: &str,
    response_code: Option<i32>,
    response_body: Option<&str>,
) -> Result<Outcome, WorkerError> {
    // Webhook attempts are capped at `max_retries` *total* attempts (§4.6
    // step 6, §9 "Webhook attempt counter semantics"), not max_retries+1 as
    // with the email worker's retry bound.
    let next_attempt = delivery.retry_count + 1;
    if next_attempt >= delivery.max_retries {
        store
            .finalize_webhook_failed(delivery.id, message, response_code, response_body)
            .await?;
        metrics::counter!("webhook_deliveries_failed_total").increment(1);
        Ok(Outcome::Done)
    } else {
        metrics::counter!("webhook_deliveries_retried_total").increment(1);
        let backoff = retry_policy.backoff(delivery.retry_count as u32);
        let next_retry_at = OffsetDateTime::now_utc() + backoff;
        store
            .finalize_webhook_retry_pending(
                delivery.id,
                next_attempt,
                next_retry_at,
                message,
                response_code,
                response_body,
            )
            .await?;
        Ok(Outcome::Defer(backoff))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_owned()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_strings_untouched() {
        assert_eq!(truncate("ok", 1024), "ok");
    }

    #[test]
    fn truncate_caps_long_strings() {
        let long = "x".repeat(2000);
        assert_eq!(truncate(&long, 1024).len(), 1024);
    }
}
