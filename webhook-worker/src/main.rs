use std::time::Duration as StdDuration;

use envconfig::Envconfig;
use health::HealthRegistry;
use mailer_common::queue::Broker;
use mailer_common::store::Store;
use sqlx::postgres::PgPoolOptions;
use time::Duration;
use tracing::info;
use webhook_worker::config::Settings;
use webhook_worker::worker::WebhookWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::init_from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.core.database_max_connections)
        .connect(&settings.core.database_url)
        .await?;

    let store = Store::new(pool.clone());
    let broker = Broker::new(pool);

    let prometheus = health::install_prometheus_recorder();

    let registry = HealthRegistry::new("webhook-worker");
    let liveness = registry
        .register("poll-loop".to_string(), time::Duration::seconds(60))
        .await;

    let worker = WebhookWorker::new(
        store,
        broker,
        StdDuration::from_secs(settings.request_timeout_secs),
        StdDuration::from_millis(settings.poll_interval_ms),
        Duration::seconds(settings.visibility_timeout_secs),
        settings.concurrency,
        liveness,
    );

    let health_routes = health::routes::router(registry)
        .merge(health::routes::metrics_router(prometheus));
    let listener = tokio::net::TcpListener::bind("0.0.0.0:8002").await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, health_routes).await;
    });

    info!("webhook-worker starting");
    worker.run().await;

    Ok(())
}
