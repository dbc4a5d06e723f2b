//! The Email Intake API (§4.1): `POST /api/v1/send/email?template=<name>`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use mailer_common::queue::EMAIL_QUEUE;
use mailer_common::render::{flatten_variables, render};
use mailer_common::store::NewEmailJob;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::router::AppState;

const DEFAULT_MAX_RETRIES: i32 = 3;

#[derive(Debug, Deserialize)]
pub struct SendEmailQuery {
    pub template: String,
}

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub service_name: String,
    pub to_email: String,
    #[serde(default)]
    pub variables_data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub job_id: Uuid,
    pub status: &'static str,
    pub message: &'static str,
    pub poll_url: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

pub enum IntakeError {
    InvalidApiKey,
    InvalidService,
    NoActiveSmtpConfig,
    TemplateNotFound,
    InvalidRecipient,
    RenderError,
    Internal,
}

impl axum::response::IntoResponse for IntakeError {
    fn into_response(self) -> axum::response::Response {
        let (status, detail) = match self {
            IntakeError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            IntakeError::InvalidService => (StatusCode::BAD_REQUEST, "Invalid email service"),
            IntakeError::NoActiveSmtpConfig => {
                (StatusCode::BAD_REQUEST, "No active SMTP configuration")
            }
            IntakeError::TemplateNotFound => (StatusCode::NOT_FOUND, "Template not found"),
            IntakeError::InvalidRecipient => (StatusCode::BAD_REQUEST, "Invalid recipient address"),
            IntakeError::RenderError => (StatusCode::BAD_REQUEST, "Template rendering error"),
            IntakeError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };
        (
            status,
            Json(ErrorResponse {
                detail: detail.to_string(),
            }),
        )
            .into_response()
    }
}

/// `to_email` must look like `local@domain` — a cheap syntactic check, not a
/// full RFC 5321 validator; anything the SMTP server itself would reject is
/// still caught there and classified per §4.3.
fn looks_like_an_email(candidate: &str) -> bool {
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

#[instrument(skip_all, fields(service = %payload.service_name, template = %query.template))]
pub async fn send_email(
    State(state): State<AppState>,
    Query(query): Query<SendEmailQuery>,
    axum::extract::Json(payload): axum::extract::Json<SendEmailRequest>,
    headers: axum::http::HeaderMap,
) -> Result<(StatusCode, Json<SendEmailResponse>), IntakeError> {
    let api_key = headers
        .get("XAPIKey")
        .and_then(|v| v.to_str().ok())
        .ok_or(IntakeError::InvalidApiKey)?;

    // Step 1: authenticate the application.
    let application = state
        .store
        .application_by_api_key(api_key)
        .await
        .map_err(|e| {
            error!(error = %e, "store error looking up application");
            IntakeError::Internal
        })?
        .ok_or(IntakeError::InvalidApiKey)?;

    if !looks_like_an_email(&payload.to_email) {
        warn!(to_email = %payload.to_email, "rejected malformed recipient at intake");
        return Err(IntakeError::InvalidRecipient);
    }

    // Step 2: active email service for this tenant.
    let service = state
        .store
        .active_email_service(application.tenant_id, &payload.service_name)
        .await
        .map_err(|_| IntakeError::Internal)?
        .ok_or(IntakeError::InvalidService)?;

    // Step 3-4: active SMTP configuration for (service, application).
    let service_config = state
        .store
        .active_service_configuration(service.id, application.id)
        .await
        .map_err(|_| IntakeError::Internal)?
        .ok_or(IntakeError::NoActiveSmtpConfig)?;

    state
        .store
        .smtp_configuration(service_config.smtp_configuration_id)
        .await
        .map_err(|_| IntakeError::Internal)?
        .ok_or(IntakeError::NoActiveSmtpConfig)?;

    // Step 5: template lookup.
    let template = state
        .store
        .template_by_tenant_name(application.tenant_id, &query.template)
        .await
        .map_err(|_| IntakeError::Internal)?
        .ok_or(IntakeError::TemplateNotFound)?;

    // Step 6: render subject and body.
    let variables = flatten_variables(&payload.variables_data);
    let subject = render(&template.subject_template, &variables, None)
        .map_err(|e| {
            warn!(error = %e, "template rendering error");
            IntakeError::RenderError
        })?;
    let body = render(&template.body_template, &variables, None).map_err(|e| {
        warn!(error = %e, "template rendering error");
        IntakeError::RenderError
    })?;

    // Step 7: persist the job as queued.
    let job = state
        .store
        .insert_job(NewEmailJob {
            tenant_id: application.tenant_id,
            application_id: application.id,
            service_id: service.id,
            to_email: payload.to_email,
            subject,
            body,
            max_retries: DEFAULT_MAX_RETRIES,
        })
        .await
        .map_err(|e| {
            error!(error = %e, "failed to persist job");
            IntakeError::Internal
        })?;

    // Step 8: enqueue the send_email task. The job row was committed by the
    // insert above, so the task is only ever enqueued for a job a worker can
    // already see (§4.1 "Ordering guarantee").
    if let Err(e) = state.broker.enqueue(EMAIL_QUEUE, &job.id).await {
        error!(error = %e, job_id = %job.id, "failed to enqueue send_email task");
        let _ = state
            .store
            .mark_job_enqueue_failed(job.id, &format!("failed to enqueue: {e}"))
            .await;
        return Err(IntakeError::Internal);
    }

    info!(job_id = %job.id, "email job queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(SendEmailResponse {
            job_id: job.id,
            status: "queued",
            message: "Email queued for delivery",
            poll_url: format!("/api/v1/jobs/{}", job.id),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_well_formed_address() {
        assert!(looks_like_an_email("alice@example.com"));
    }

    #[test]
    fn rejects_addresses_without_an_at_sign() {
        assert!(!looks_like_an_email("alice.example.com"));
    }

    #[test]
    fn rejects_addresses_without_a_dotted_domain() {
        assert!(!looks_like_an_email("alice@localhost"));
    }

    #[test]
    fn rejects_empty_local_part() {
        assert!(!looks_like_an_email("@example.com"));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn unknown_api_key_is_rejected(pool: sqlx::PgPool) {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use http_body_util::BodyExt;
        use tower::ServiceExt;

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
                    .method("POST")
                    .uri("/api/v1/send/email?template=welcome")
                    .header("XAPIKey", "nonexistent-key")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"service_name":"notifications","to_email":"alice@example.com"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["detail"], "Invalid API key");
    }
}
