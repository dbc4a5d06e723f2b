//! The Email Worker (§4.2): dequeues `send_email` tasks, locks the
//! corresponding job row, sends via SMTP, and finalizes the job's terminal
//! state. Mirrors the teacher's poll-then-spawn loop (semaphore-bounded
//! concurrency, liveness reported once per poll tick) but talks to
//! [`mailer_common::queue::Broker`] and [`mailer_common::store::Store`]
//! instead of a batch-oriented `PgQueue`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use health::HealthHandle;
use mailer_common::crypto::WrapKey;
use mailer_common::models::{Application, EmailJob, EmailService};
use mailer_common::queue::{Broker, EMAIL_QUEUE};
use mailer_common::retry::RetryPolicy;
use mailer_common::store::Store;
use time::{Duration, OffsetDateTime};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatcher;
use crate::error::WorkerError;
use crate::smtp::{self, OutgoingEmail};

pub struct EmailWorker {
    store: Store,
    broker: Broker,
    wrap_key: WrapKey,
    poll_interval: StdDuration,
    visibility_timeout: Duration,
    stale_processing: Duration,
    max_concurrent: usize,
    max_tasks_before_recycle: u64,
    retry_policy: RetryPolicy,
    liveness: HealthHandle,
}

impl EmailWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        broker: Broker,
        wrap_key: WrapKey,
        poll_interval: StdDuration,
        visibility_timeout: Duration,
        stale_processing: Duration,
        max_concurrent: usize,
        max_tasks_before_recycle: u64,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            store,
            broker,
            wrap_key,
            poll_interval,
            visibility_timeout,
            stale_processing,
            max_concurrent,
            max_tasks_before_recycle,
            retry_policy: RetryPolicy::email_default(),
            liveness,
        }
    }

    /// Poll indefinitely, processing up to `max_concurrent` jobs at once.
    /// Returns once `max_tasks_before_recycle` tasks have been dispatched, if
    /// that limit is nonzero, so the process can exit and be recycled by its
    /// supervisor.
    pub async fn run(&self) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut interval = tokio::time::interval(self.poll_interval);
        let mut dispatched: u64 = 0;

        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            let task = match self.broker.dequeue(EMAIL_QUEUE, self.visibility_timeout).await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "failed to dequeue send_email task");
                    continue;
                }
            };

            let job_id: Uuid = match task.payload_as() {
                Ok(id) => id,
                Err(e) => {
                    error!(error = %e, task_id = %task.id, "malformed send_email task payload");
                    let _ = self.broker.nack_fail(task.id).await;
                    continue;
                }
            };

            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let store = self.store.clone();
            let broker = self.broker.clone();
            let wrap_key = self.wrap_key.clone();
            let stale_processing = self.stale_processing;
            let retry_policy = self.retry_policy;
            let task_id = task.id;

            tokio::spawn(async move {
                let outcome =
                    process_job(&store, &broker, &wrap_key, job_id, stale_processing, &retry_policy).await;
                match outcome {
                    Ok(TaskOutcome::Done) => {
                        if let Err(e) = broker.ack(task_id).await {
                            error!(error = %e, task_id = %task_id, "failed to ack send_email task");
                        }
                    }
                    Ok(TaskOutcome::Defer(delay)) => {
                        if let Err(e) = broker.nack_retry(task_id, delay).await {
                            error!(error = %e, task_id = %task_id, "failed to defer send_email task");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, task_id = %task_id, job_id = %job_id, "error processing email job");
                        let _ = broker.nack_retry(task_id, Duration::seconds(30)).await;
                    }
                }
                drop(permit);
            });

            dispatched += 1;
            if self.max_tasks_before_recycle > 0 && dispatched >= self.max_tasks_before_recycle {
                info!(dispatched, "worker reached recycle limit, exiting for supervisor restart");
                return;
            }
        }
    }
}

enum TaskOutcome {
    /// The job reached a terminal state (sent/failed) or was already
    /// terminal; the broker task should be acked.
    Done,
    /// The job is mid-flight elsewhere or not yet due; redeliver the task
    /// after `delay` without touching job state.
    Defer(Duration),
}

async fn process_job(
    store: &Store,
    broker: &Broker,
    wrap_key: &WrapKey,
    job_id: Uuid,
    stale_processing: Duration,
    retry_policy: &RetryPolicy,
) -> Result<TaskOutcome, WorkerError> {
    metrics::counter!("email_jobs_dequeued_total").increment(1);
    let started_at = std::time::Instant::now();
    let outcome = process_job_inner(store, broker, wrap_key, job_id, stale_processing, retry_policy).await;
    metrics::histogram!("email_worker_processing_duration_seconds")
        .record(started_at.elapsed().as_secs_f64());
    outcome
}

async fn process_job_inner(
    store: &Store,
    broker: &Broker,
    wrap_key: &WrapKey,
    job_id: Uuid,
    stale_processing: Duration,
    retry_policy: &RetryPolicy,
) -> Result<TaskOutcome, WorkerError> {
    let Some(locked) = store.try_lock_job(job_id).await? else {
        // Another worker holds the row right now; it owns this delivery.
        return Ok(TaskOutcome::Defer(Duration::seconds(5)));
    };

    // Step 2 (idempotency gate): a job with `sent_at` set has already been
    // delivered, no matter what queue redelivery brought us here.
    if locked.job.sent_at.is_some() {
        locked.release().await?;
        return Ok(TaskOutcome::Done);
    }

    match locked.job.status.as_str() {
        "sent" | "failed" => {
            locked.release().await?;
            return Ok(TaskOutcome::Done);
        }
        "processing" => {
            let started = locked.job.processing_started_at;
            let stale = started
                .map(|t| OffsetDateTime::now_utc() - t > stale_processing)
                .unwrap_or(true);
            if !stale {
                locked.release().await?;
                return Ok(TaskOutcome::Defer(Duration::seconds(30)));
            }
            // Stale: a prior worker crashed mid-send. Fall through and retry.
        }
        "queued" | "retry_pending" => {}
        other => {
            warn!(job_id = %job_id, status = other, "job in unexpected status, skipping");
            locked.release().await?;
            return Ok(TaskOutcome::Done);
        }
    }

    let job_snapshot = locked.job.clone();
    locked.mark_processing(OffsetDateTime::now_utc()).await?;

    let Some(application) = store.application_by_id(job_snapshot.application_id).await? else {
        store
            .finalize_failed(job_snapshot.id, "system", "owning application no longer exists")
            .await?;
        return Ok(TaskOutcome::Done);
    };

    let Some(service) = store.email_service_by_id(job_snapshot.service_id).await? else {
        finalize_and_notify(
            store,
            broker,
            &application,
            "unknown",
            job_snapshot.id,
            "system",
            "owning email service no longer exists",
        )
        .await?;
        return Ok(TaskOutcome::Done);
    };

    let smtp_config = match store
        .smtp_configuration_for_job(job_snapshot.service_id, job_snapshot.application_id)
        .await?
    {
        Some(c) => c,
        None => {
            finalize_and_notify(
                store,
                broker,
                &application,
                &service.name,
                job_snapshot.id,
                "system",
                "no active SMTP configuration",
            )
            .await?;
            return Ok(TaskOutcome::Done);
        }
    };

    let password = wrap_key.unwrap(&smtp_config.password_wrapped);

    let send_result = smtp::send(
        smtp_config.clone(),
        password,
        OutgoingEmail {
            from: smtp_config.username.clone(),
            to: job_snapshot.to_email.clone(),
            subject: job_snapshot.subject.clone(),
            body: job_snapshot.body.clone(),
        },
    )
    .await;

    match send_result {
        Ok(()) => {
            let now = OffsetDateTime::now_utc();
            store.finalize_sent(job_snapshot.id, now).await?;
            store.insert_log(job_snapshot.id, "sent", None, None).await?;
            metrics::counter!("email_jobs_sent_total").increment(1);

            notify(store, broker, &application, &service, job_snapshot.id).await?;
            Ok(TaskOutcome::Done)
        }
        Err(failure) => {
            store
                .insert_log(job_snapshot.id, "send_failed", None, Some(failure.message()))
                .await?;

            match failure.category() {
                "permanent" => {
                    metrics::counter!("email_jobs_failed_total", "category" => "permanent")
                        .increment(1);
                    finalize_and_notify(
                        store,
                        broker,
                        &application,
                        &service.name,
                        job_snapshot.id,
                        "permanent",
                        failure.message(),
                    )
                    .await?;
                    Ok(TaskOutcome::Done)
                }
                _ => {
                    let next_attempt = job_snapshot.retry_count + 1;
                    if next_attempt > job_snapshot.max_retries {
                        metrics::counter!("email_jobs_failed_total", "category" => "temporary")
                            .increment(1);
                        finalize_and_notify(
                            store,
                            broker,
                            &application,
                            &service.name,
                            job_snapshot.id,
                            "temporary",
                            failure.message(),
                        )
                        .await?;
                        Ok(TaskOutcome::Done)
                    } else {
                        metrics::counter!("email_jobs_retried_total").increment(1);
                        let backoff = retry_policy.backoff(job_snapshot.retry_count as u32);
                        let next_retry_at = OffsetDateTime::now_utc() + backoff;
                        store
                            .finalize_retry_pending(
                                job_snapshot.id,
                                next_attempt,
                                next_retry_at,
                                failure.message(),
                            )
                            .await?;
                        Ok(TaskOutcome::Defer(backoff))
                    }
                }
            }
        }
    }
}

/// Finalize a job as `failed` with `category`/`message`, then dispatch the
/// `email.failed` webhook for it if the application is subscribed.
async fn finalize_and_notify(
    store: &Store,
    broker: &Broker,
    application: &Application,
    service_name: &str,
    job_id: Uuid,
    category: &str,
    message: &str,
) -> Result<(), WorkerError> {
    store.finalize_failed(job_id, category, message).await?;
    notify(store, broker, application, &placeholder_service(service_name), job_id).await
}

async fn notify(
    store: &Store,
    broker: &Broker,
    application: &Application,
    service: &EmailService,
    job_id: Uuid,
) -> Result<(), WorkerError> {
    let job = refetch(store, job_id).await?;
    dispatcher::dispatch_if_subscribed(store, broker, application, &service.name, &job).await;
    Ok(())
}

/// `EmailService` only matters to the dispatcher for its `name` field; when
/// the real service row is gone we still want an `email.failed` webhook to
/// fire, so this stands in with the name already resolved by the caller.
fn placeholder_service(name: &str) -> EmailService {
    EmailService {
        id: Uuid::nil(),
        tenant_id: Uuid::nil(),
        name: name.to_string(),
        status: "active".to_string(),
        template_id: None,
    }
}

async fn refetch(store: &Store, job_id: Uuid) -> Result<EmailJob, WorkerError> {
    store
        .get_job(job_id)
        .await?
        .ok_or(WorkerError::Store(mailer_common::error::StoreError::NotFound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailer_common::store::NewEmailJob;
    use sqlx::PgPool;

    fn test_retry_policy() -> RetryPolicy {
        RetryPolicy::email_default()
    }

    fn test_wrap_key() -> WrapKey {
        WrapKey::new(&[9u8; 32])
    }

    async fn new_queued_job(store: &Store) -> EmailJob {
        store
            .insert_job(NewEmailJob {
                tenant_id: Uuid::now_v7(),
                application_id: Uuid::now_v7(),
                service_id: Uuid::now_v7(),
                to_email: "alice@example.com".to_string(),
                subject: "hi".to_string(),
                body: "hi".to_string(),
                max_retries: 3,
            })
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn already_sent_job_is_a_noop(pool: PgPool) {
        let store = Store::new(pool.clone());
        let broker = Broker::new(pool);
        let job = new_queued_job(&store).await;
        store.finalize_sent(job.id, OffsetDateTime::now_utc()).await.unwrap();

        let outcome = process_job(
            &store,
            &broker,
            &test_wrap_key(),
            job.id,
            Duration::seconds(300),
            &test_retry_policy(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, TaskOutcome::Done));
        // idempotency gate must not have touched the row a second time.
        let reloaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, "sent");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn already_failed_job_is_a_noop(pool: PgPool) {
        let store = Store::new(pool.clone());
        let broker = Broker::new(pool);
        let job = new_queued_job(&store).await;
        store.finalize_failed(job.id, "permanent", "rejected").await.unwrap();

        let outcome = process_job(
            &store,
            &broker,
            &test_wrap_key(),
            job.id,
            Duration::seconds(300),
            &test_retry_policy(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, TaskOutcome::Done));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn recent_processing_job_is_deferred_not_resent(pool: PgPool) {
        let store = Store::new(pool.clone());
        let broker = Broker::new(pool);
        let job = new_queued_job(&store).await;
        let locked = store.try_lock_job(job.id).await.unwrap().unwrap();
        locked.mark_processing(OffsetDateTime::now_utc()).await.unwrap();

        let outcome = process_job(
            &store,
            &broker,
            &test_wrap_key(),
            job.id,
            Duration::seconds(300),
            &test_retry_policy(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, TaskOutcome::Defer(_)));
        let reloaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, "processing");
    }
}
