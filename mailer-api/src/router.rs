use std::time::Duration as StdDuration;

use axum::{routing, Router};
use health::HealthRegistry;
use mailer_common::queue::Broker;
use mailer_common::store::Store;

use crate::handlers::{jobs, send_email};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub broker: Broker,
}

pub fn add_routes(router: Router, state: AppState, health_registry: HealthRegistry) -> Router {
    let health_routes = health::routes::router(health_registry);

    router
        .route("/api/v1/send/email", routing::post(send_email::send_email))
        .route("/api/v1/jobs/:id", routing::get(jobs::get_job))
        .route("/api/v1/jobs/:id/full", routing::get(jobs::get_job_full))
        .with_state(state)
        .merge(health_routes)
}

/// Readiness ping budget (§6 "Health"): store + broker must both respond
/// within 3s.
pub const READINESS_TIMEOUT: StdDuration = StdDuration::from_secs(3);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use mailer_common::queue::Broker;
    use mailer_common::store::Store;
    use sqlx::PgPool;
    use tower::ServiceExt;

    #[sqlx::test(migrations = "../migrations")]
    async fn liveness_is_always_ok(db: PgPool) {
        let registry = HealthRegistry::new("mailer-api");
        let state = AppState {
            store: Store::new(db.clone()),
            broker: Broker::new(db),
        };

        let app = add_routes(Router::new(), state, registry);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/_liveness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn health_ready_reflects_registered_components(db: PgPool) {
        let registry = HealthRegistry::new("mailer-api");
        let _handle = registry
            .register("store".to_string(), time::Duration::seconds(15))
            .await;
        let state = AppState {
            store: Store::new(db.clone()),
            broker: Broker::new(db),
        };

        let app = add_routes(Router::new(), state, registry);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
