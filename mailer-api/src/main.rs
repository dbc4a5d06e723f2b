use envconfig::Envconfig;
use health::HealthRegistry;
use mailer_api::config::Settings;
use mailer_api::router::{add_routes, AppState, READINESS_TIMEOUT};
use mailer_common::queue::Broker;
use mailer_common::store::Store;
use sqlx::postgres::PgPoolOptions;
use time::Duration;
use tracing::{error, info};

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

    let registry = HealthRegistry::new("mailer-api");
    let db_handle = registry
        .register("store".to_string(), Duration::seconds(15))
        .await;
    let broker_handle = registry
        .register("broker".to_string(), Duration::seconds(15))
        .await;

    spawn_readiness_loop(store.clone(), db_handle);
    spawn_broker_readiness_loop(broker.clone(), broker_handle);

    let state = AppState { store, broker };
    let app = add_routes(axum::Router::new(), state, registry)
        .merge(health::routes::metrics_router(prometheus));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "mailer-api listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Pings the store every 5s and reports the result to the registry, so
/// `/health/ready` degrades if the database becomes unreachable (§6
/// "Health": "store and broker both respond to a ping within 3s").
fn spawn_readiness_loop(store: Store, handle: health::HealthHandle) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            match tokio::time::timeout(READINESS_TIMEOUT, store.ping()).await {
                Ok(Ok(())) => handle.report_healthy().await,
                Ok(Err(e)) => error!(error = %e, "store readiness ping failed"),
                Err(_) => error!("store readiness ping timed out"),
            }
        }
    });
}

/// As [`spawn_readiness_loop`] but for the broker. The broker shares the
/// store's connection pool today, so in practice the two pings rise and
/// fall together, but they're tracked as independent components so the
/// readiness body names each dependency separately per §6.
fn spawn_broker_readiness_loop(broker: Broker, handle: health::HealthHandle) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            match tokio::time::timeout(READINESS_TIMEOUT, broker.ping()).await {
                Ok(Ok(())) => handle.report_healthy().await,
                Ok(Err(e)) => error!(error = %e, "broker readiness ping failed"),
                Err(_) => error!("broker readiness ping timed out"),
            }
        }
    });
}
