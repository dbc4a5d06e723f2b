use envconfig::Envconfig;
use health::HealthRegistry;
use mailer_common::queue::Broker;
use mailer_common::store::Store;
use mailer_janitor::config::Settings;
use mailer_janitor::reconcile::Janitor;
use sqlx::postgres::PgPoolOptions;
use time::Duration;
use tracing::info;

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

    let registry = HealthRegistry::new("mailer-janitor");
    let liveness = registry
        .register("sweep".to_string(), time::Duration::seconds(settings.sweep_interval_secs as i64 * 3))
        .await;

    let janitor = Janitor::new(
        store,
        broker,
        std::time::Duration::from_secs(settings.sweep_interval_secs),
        Duration::seconds(settings.stale_queued_secs),
        Duration::seconds(settings.stuck_processing_secs),
        liveness,
    );

    let health_routes = health::routes::router(registry)
        .merge(health::routes::metrics_router(prometheus));
    let listener = tokio::net::TcpListener::bind("0.0.0.0:8003").await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, health_routes).await;
    });

    info!("mailer-janitor starting");
    janitor.run().await;

    Ok(())
}
