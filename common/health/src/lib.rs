//! Liveness/readiness bookkeeping shared by every long-running process in the
//! workspace (API, workers, janitor). A process registers one `HealthHandle`
//! per component it wants tracked (e.g. "store", "queue", "poll-loop") and
//! reports on a schedule; the registry is healthy iff every registered
//! component has reported within its configured TTL.

use std::collections::HashMap;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct ComponentState {
    ttl: Duration,
    last_report: OffsetDateTime,
}

impl ComponentState {
    fn is_healthy(&self, now: OffsetDateTime) -> bool {
        now - self.last_report <= self.ttl
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub healthy: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: Vec<ComponentStatus>,
}

/// A named collection of components whose liveness is tracked together.
#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<Mutex<HashMap<String, ComponentState>>>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new component with the given time-to-live and return a
    /// handle the owner can use to report liveness on a schedule.
    pub async fn register(&self, component: String, ttl: Duration) -> HealthHandle {
        let mut components = self.components.lock().await;
        components.insert(
            component.clone(),
            ComponentState {
                ttl,
                last_report: OffsetDateTime::now_utc(),
            },
        );

        HealthHandle {
            component,
            registry: self.components.clone(),
        }
    }

    pub async fn get_status(&self) -> HealthStatus {
        let components = self.components.lock().await;
        let now = OffsetDateTime::now_utc();

        let statuses: Vec<ComponentStatus> = components
            .iter()
            .map(|(name, state)| ComponentStatus {
                name: name.clone(),
                healthy: state.is_healthy(now),
            })
            .collect();

        let healthy = !statuses.is_empty() && statuses.iter().all(|s| s.healthy);

        HealthStatus {
            healthy,
            components: statuses,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A handle a component uses to report that it is still alive. Cloning a
/// handle and reporting from multiple tasks is safe.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    registry: Arc<Mutex<HashMap<String, ComponentState>>>,
}

impl HealthHandle {
    pub async fn report_healthy(&self) {
        let mut components = self.registry.lock().await;
        if let Some(state) = components.get_mut(&self.component) {
            state.last_report = OffsetDateTime::now_utc();
        }
    }
}

/// Install the process-wide Prometheus recorder and return a handle whose
/// `render()` produces the text-exposition body for a `/metrics` scrape
/// (§2 item 10 "Health & Metrics"). Call this once per process, before the
/// first `metrics::counter!`/`histogram!` call.
pub fn install_prometheus_recorder() -> metrics_exporter_prometheus::PrometheusHandle {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install the Prometheus metrics recorder")
}

pub mod routes {
    //! HTTP surface built on top of a [`HealthRegistry`]: liveness (the
    //! process only asserts it is scheduling at all, never fails),
    //! readiness (reflects the registry's components, per §6 "store and
    //! broker both respond within 3s"), and a Prometheus scrape endpoint.
    //! Both the spec's `/health/live`/`/health/ready` paths and the
    //! teacher's own `/_liveness`/`/_readiness` convention are mounted, the
    //! latter for operators already wired to it.

    use axum::{extract::State, http::StatusCode, routing, Json, Router};
    use metrics_exporter_prometheus::PrometheusHandle;

    use super::HealthRegistry;

    pub fn router(registry: HealthRegistry) -> Router {
        Router::new()
            .route("/_liveness", routing::get(liveness))
            .route("/_readiness", routing::get(readiness))
            .route("/health/live", routing::get(liveness))
            .route("/health/ready", routing::get(readiness))
            .with_state(registry)
    }

    /// Mount `/metrics` serving the Prometheus text exposition format from
    /// `handle`, as returned by [`super::install_prometheus_recorder`].
    pub fn metrics_router(handle: PrometheusHandle) -> Router {
        Router::new()
            .route("/metrics", routing::get(metrics))
            .with_state(handle)
    }

    async fn metrics(State(handle): State<PrometheusHandle>) -> String {
        handle.render()
    }

    async fn liveness() -> &'static str {
        "ok"
    }

    async fn readiness(
        State(registry): State<HealthRegistry>,
    ) -> (StatusCode, Json<super::HealthStatus>) {
        let status = registry.get_status().await;
        let code = if status.healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (code, Json(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("test");
        assert!(!registry.get_status().await.healthy);
    }

    #[tokio::test]
    async fn reports_healthy_after_registration() {
        let registry = HealthRegistry::new("test");
        let _handle = registry.register("worker".to_string(), Duration::seconds(30)).await;
        assert!(registry.get_status().await.healthy);
    }

    #[tokio::test]
    async fn goes_unhealthy_past_ttl() {
        let registry = HealthRegistry::new("test");
        let _handle = registry
            .register("worker".to_string(), Duration::milliseconds(-1))
            .await;
        assert!(!registry.get_status().await.healthy);
    }

    #[tokio::test]
    async fn report_healthy_refreshes_the_deadline() {
        let registry = HealthRegistry::new("test");
        let handle = registry.register("worker".to_string(), Duration::seconds(30)).await;
        handle.report_healthy().await;
        assert!(registry.get_status().await.healthy);
    }
}
