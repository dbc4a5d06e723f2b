use std::time::Duration as StdDuration;

use envconfig::Envconfig;
use health::HealthRegistry;
use mailer_common::queue::Broker;
use mailer_common::store::Store;
use mailer_worker::config::Settings;
use mailer_worker::worker::EmailWorker;
use sqlx::postgres::PgPoolOptions;
use time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::init_from_env()?;
    let wrap_key = settings.core.wrap_key()?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.core.database_max_connections)
        .connect(&settings.core.database_url)
        .await?;

    let store = Store::new(pool.clone());
    let broker = Broker::new(pool);

    let prometheus = health::install_prometheus_recorder();

    let registry = HealthRegistry::new("mailer-worker");
    let liveness = registry
        .register("poll-loop".to_string(), time::Duration::seconds(60))
        .await;

    let worker = EmailWorker::new(
        store,
        broker,
        wrap_key,
        StdDuration::from_millis(settings.poll_interval_ms),
        Duration::seconds(settings.visibility_timeout_secs),
        Duration::seconds(settings.stale_processing_secs),
        settings.concurrency,
        settings.max_tasks_before_recycle,
        liveness,
    );

    let health_routes = health::routes::router(registry)
        .merge(health::routes::metrics_router(prometheus));
    let listener = tokio::net::TcpListener::bind("0.0.0.0:8001").await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, health_routes).await;
    });

    info!("mailer-worker starting");
    worker.run().await;

    Ok(())
}
