//! Periodic reconciliation (§9 "Outbox ordering"): catches jobs whose
//! `send_email` task never reached the broker (intake crashed between
//! committing the job row and enqueueing) and jobs abandoned mid-flight by a
//! crashed email worker. Both cases are rare — ordinary delivery doesn't
//! touch this path — so a coarse poll loop is enough; there is no tight
//! latency requirement on top of the broker's own visibility timeout.

use health::HealthHandle;
use mailer_common::queue::{Broker, EMAIL_QUEUE};
use mailer_common::store::Store;
use time::Duration;
use tracing::{info, warn};

pub struct Janitor {
    store: Store,
    broker: Broker,
    sweep_interval: std::time::Duration,
    stale_queued: Duration,
    stuck_processing: Duration,
    liveness: HealthHandle,
}

impl Janitor {
    pub fn new(
        store: Store,
        broker: Broker,
        sweep_interval: std::time::Duration,
        stale_queued: Duration,
        stuck_processing: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            store,
            broker,
            sweep_interval,
            stale_queued,
            stuck_processing,
            liveness,
        }
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;
            if let Err(e) = self.sweep_once().await {
                warn!(error = %e, "janitor sweep failed");
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<(), mailer_common::error::StoreError> {
        let stale_queued = self.store.find_stale_queued_jobs(self.stale_queued).await?;
        for job in &stale_queued {
            match self.broker.enqueue(EMAIL_QUEUE, &job.id).await {
                Ok(_) => {
                    metrics::counter!("janitor_stale_queued_reenqueued_total").increment(1);
                    info!(job_id = %job.id, "re-enqueued stale queued job");
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "failed to re-enqueue stale queued job"),
            }
        }

        let stuck = self.store.find_stuck_processing_jobs(self.stuck_processing).await?;
        for job in &stuck {
            self.store.reset_stuck_job_to_queued(job.id).await?;
            match self.broker.enqueue(EMAIL_QUEUE, &job.id).await {
                Ok(_) => {
                    metrics::counter!("janitor_stuck_processing_reclaimed_total").increment(1);
                    info!(job_id = %job.id, "reclaimed stuck processing job");
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "failed to re-enqueue reclaimed job"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use health::HealthRegistry;
    use mailer_common::store::NewEmailJob;
    use sqlx::PgPool;
    use uuid::Uuid;

    async fn janitor_for(pool: PgPool) -> Janitor {
        let registry = HealthRegistry::new("test");
        let liveness = registry.register("sweep".to_string(), time::Duration::seconds(60)).await;
        Janitor::new(
            Store::new(pool.clone()),
            Broker::new(pool),
            std::time::Duration::from_secs(60),
            Duration::seconds(0),
            Duration::seconds(0),
            liveness,
        )
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn sweep_requeues_a_stale_queued_job(pool: PgPool) {
        let janitor = janitor_for(pool.clone()).await;
        let store = Store::new(pool.clone());
        let broker = Broker::new(pool);

        let job = store
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
            .unwrap();

        janitor.sweep_once().await.unwrap();

        let task = broker.dequeue(EMAIL_QUEUE, Duration::seconds(60)).await.unwrap();
        let task = task.expect("janitor should have enqueued the stale job");
        assert_eq!(task.payload_as::<Uuid>().unwrap(), job.id);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn sweep_resets_and_requeues_a_stuck_processing_job(pool: PgPool) {
        let janitor = janitor_for(pool.clone()).await;
        let store = Store::new(pool.clone());
        let broker = Broker::new(pool);

        let job = store
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
            .unwrap();
        let locked = store.try_lock_job(job.id).await.unwrap().unwrap();
        locked.mark_processing(time::OffsetDateTime::now_utc()).await.unwrap();

        janitor.sweep_once().await.unwrap();

        let reloaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, "queued");

        let task = broker.dequeue(EMAIL_QUEUE, Duration::seconds(60)).await.unwrap();
        assert!(task.is_some());
    }
}
