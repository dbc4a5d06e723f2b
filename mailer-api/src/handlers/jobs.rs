//! The Job Status API (§6): `GET /api/v1/jobs/{id}` and `.../full`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mailer_common::models::{EmailJob, WebhookDelivery};
use serde::Serialize;
use uuid::Uuid;

use crate::router::AppState;

pub enum JobLookupError {
    NotFound,
    Internal,
}

impl axum::response::IntoResponse for JobLookupError {
    fn into_response(self) -> axum::response::Response {
        let (status, detail) = match self {
            JobLookupError::NotFound => (StatusCode::NOT_FOUND, "Job not found"),
            JobLookupError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// The subset of a [`WebhookDelivery`] the `/full` contract exposes (§6) —
/// deliberately narrower than the full row so the snapshot `webhook_url` and
/// raw `payload` (which may echo template variables) never leave this API.
#[derive(Debug, Serialize)]
pub struct WebhookDeliverySummary {
    pub id: Uuid,
    pub status: String,
    pub event_type: String,
    pub retry_count: i32,
    pub delivered_at: Option<time::OffsetDateTime>,
    pub last_error: Option<String>,
    pub last_response_code: Option<i32>,
}

impl From<WebhookDelivery> for WebhookDeliverySummary {
    fn from(d: WebhookDelivery) -> Self {
        Self {
            id: d.id,
            status: d.status,
            event_type: d.event_type,
            retry_count: d.retry_count,
            delivered_at: d.delivered_at,
            last_error: d.last_error,
            last_response_code: d.last_response_code,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobWithDelivery {
    #[serde(flatten)]
    pub job: EmailJob,
    pub webhook_delivery: Option<WebhookDeliverySummary>,
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmailJob>, JobLookupError> {
    let job = state
        .store
        .get_job(id)
        .await
        .map_err(|_| JobLookupError::Internal)?
        .ok_or(JobLookupError::NotFound)?;
    Ok(Json(job))
}

pub async fn get_job_full(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobWithDelivery>, JobLookupError> {
    let job = state
        .store
        .get_job(id)
        .await
        .map_err(|_| JobLookupError::Internal)?
        .ok_or(JobLookupError::NotFound)?;

    let webhook_delivery = state
        .store
        .get_webhook_delivery_for_job(job.id)
        .await
        .map_err(|_| JobLookupError::Internal)?;

    Ok(Json(JobWithDelivery {
        job,
        webhook_delivery: webhook_delivery.map(WebhookDeliverySummary::from),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[sqlx::test(migrations = "../migrations")]
    async fn unknown_job_id_is_404(pool: sqlx::PgPool) {
        let state = crate::router::AppState {
            store: mailer_common::store::Store::new(pool.clone()),
            broker: mailer_common::queue::Broker::new(pool),
        };
        let app = crate::router::add_routes(
            axum::Router::new(),
            state,
            health::HealthRegistry::new("mailer-api"),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/jobs/{}", uuid::Uuid::now_v7()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn malformed_job_id_is_400(pool: sqlx::PgPool) {
        let state = crate::router::AppState {
            store: mailer_common::store::Store::new(pool.clone()),
            broker: mailer_common::queue::Broker::new(pool),
        };
        let app = crate::router::add_routes(
            axum::Router::new(),
            state,
            health::HealthRegistry::new("mailer-api"),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/jobs/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
