//! The Job Queue Broker (§2 item 2): a FIFO task bus over Postgres with
//! at-least-once delivery, per-task acknowledgment, and a visibility
//! timeout. Separate named queues (`email_delivery`, `webhook_delivery`)
//! share one `tasks` table, distinguished by the `queue` column.
//!
//! Unlike [`crate::store::Store`]'s job-row locks, a dequeued task is not
//! held under an open transaction while the worker performs its network
//! I/O: `dequeue` marks the row invisible until `visible_at` and commits
//! immediately, so a crashed worker's task simply becomes visible again
//! once the deadline passes (§5 "Cancellation & timeouts" — redelivery is
//! the only recovery mechanism, not cancellation).

use serde::{de::DeserializeOwned, Serialize};
use sqlx::postgres::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::QueueError;

pub const EMAIL_QUEUE: &str = "email_delivery";
pub const WEBHOOK_QUEUE: &str = "webhook_delivery";

#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub attempt: i32,
}

impl Task {
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[derive(Clone)]
pub struct Broker {
    pool: PgPool,
}

impl Broker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue `payload` onto `queue`, visible immediately.
    pub async fn enqueue<T: Serialize>(&self, queue: &str, payload: &T) -> Result<Uuid, QueueError> {
        let id = Uuid::now_v7();
        let payload = serde_json::to_value(payload).expect("payload must serialize to JSON");

        sqlx::query(
            r#"
            INSERT INTO tasks (id, queue, payload, attempt, visible_at, created_at)
            VALUES ($1, $2, $3, 0, now(), now())
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Pop the oldest visible task from `queue`, hiding it until
    /// `now + visibility_timeout`. Returns `None` if no task is currently
    /// visible. At-least-once: a task that is never acked/nacked becomes
    /// visible again once the timeout elapses.
    pub async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Task>, QueueError> {
        let visible_at = OffsetDateTime::now_utc() + visibility_timeout;

        let row: Option<(Uuid, serde_json::Value, i32)> = sqlx::query_as(
            r#"
            UPDATE tasks
            SET visible_at = $2, attempt = attempt + 1
            WHERE id = (
                SELECT id FROM tasks
                WHERE queue = $1 AND visible_at <= now()
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload, attempt
            "#,
        )
        .bind(queue)
        .bind(visible_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, payload, attempt)| Task {
            id,
            queue: queue.to_owned(),
            payload,
            attempt,
        }))
    }

    /// Acknowledge successful processing: remove the task permanently.
    pub async fn ack(&self, task_id: Uuid) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Re-raise for redelivery after `delay` (§4.2 step 7's backoff).
    pub async fn nack_retry(&self, task_id: Uuid, delay: Duration) -> Result<(), QueueError> {
        let visible_at = OffsetDateTime::now_utc() + delay;
        sqlx::query("UPDATE tasks SET visible_at = $2 WHERE id = $1")
            .bind(task_id)
            .bind(visible_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Terminal failure: the job/delivery's own state already reflects the
    /// outcome, so the task is simply removed from the queue.
    pub async fn nack_fail(&self, task_id: Uuid) -> Result<(), QueueError> {
        self.ack(task_id).await
    }

    pub async fn ping(&self) -> Result<(), QueueError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "../migrations")]
    async fn dequeue_returns_none_on_empty_queue(pool: PgPool) {
        let broker = Broker::new(pool);
        let task = broker
            .dequeue(EMAIL_QUEUE, Duration::seconds(120))
            .await
            .unwrap();
        assert!(task.is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn enqueue_then_dequeue_round_trips_payload(pool: PgPool) {
        let broker = Broker::new(pool);
        let job_id = Uuid::now_v7();
        broker.enqueue(EMAIL_QUEUE, &job_id).await.unwrap();

        let task = broker
            .dequeue(EMAIL_QUEUE, Duration::seconds(120))
            .await
            .unwrap()
            .expect("task should be visible");
        assert_eq!(task.payload_as::<Uuid>().unwrap(), job_id);
        assert_eq!(task.attempt, 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn dequeued_task_is_hidden_until_visibility_timeout(pool: PgPool) {
        let broker = Broker::new(pool);
        broker.enqueue(EMAIL_QUEUE, &"payload").await.unwrap();

        let first = broker
            .dequeue(EMAIL_QUEUE, Duration::seconds(120))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = broker
            .dequeue(EMAIL_QUEUE, Duration::seconds(120))
            .await
            .unwrap();
        assert!(second.is_none(), "task should stay invisible until its timeout elapses");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn ack_removes_the_task(pool: PgPool) {
        let broker = Broker::new(pool);
        broker.enqueue(EMAIL_QUEUE, &"payload").await.unwrap();
        let task = broker
            .dequeue(EMAIL_QUEUE, Duration::seconds(120))
            .await
            .unwrap()
            .unwrap();

        broker.ack(task.id).await.unwrap();

        // Even after the original visibility window, an acked task never reappears.
        broker.nack_retry(task.id, Duration::seconds(-1)).await.ok();
        let again = broker
            .dequeue(EMAIL_QUEUE, Duration::seconds(0))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn nack_retry_makes_the_task_visible_again_after_delay(pool: PgPool) {
        let broker = Broker::new(pool);
        broker.enqueue(EMAIL_QUEUE, &"payload").await.unwrap();
        let task = broker
            .dequeue(EMAIL_QUEUE, Duration::seconds(120))
            .await
            .unwrap()
            .unwrap();

        broker.nack_retry(task.id, Duration::seconds(-1)).await.unwrap();

        let redelivered = broker
            .dequeue(EMAIL_QUEUE, Duration::seconds(120))
            .await
            .unwrap();
        assert!(redelivered.is_some());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn separate_queues_do_not_interfere(pool: PgPool) {
        let broker = Broker::new(pool);
        broker.enqueue(EMAIL_QUEUE, &"email-task").await.unwrap();

        let webhook_task = broker
            .dequeue(WEBHOOK_QUEUE, Duration::seconds(120))
            .await
            .unwrap();
        assert!(webhook_task.is_none());
    }
}
