use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

use glucobridge::auth::AuthorityTable;
use glucobridge::config::Config;
use glucobridge::query::QueryFacade;
use glucobridge::realtime::RealtimeHub;
use glucobridge::store::{new_entry_store, new_treatment_store, DeviceRegistry};
use glucobridge::store::object::S3ObjectStore;
use glucobridge::vendor::VendorPoller;
use glucobridge::{http, ingest, AppState};

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("GLUCOBRIDGE_CONFIG").unwrap_or_else(|_| "glucobridge.toml".to_string());
    let config = Arc::new(Config::load(&config_path)?);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone())),
        )
        .init();

    let object_store = Arc::new(S3ObjectStore::new(&config.object_store).await);
    let devices = Arc::new(DeviceRegistry::new());
    let tracker = TaskTracker::new();

    let entries = new_entry_store(devices.clone(), object_store.clone(), tracker.clone());
    let treatments = new_treatment_store(object_store, tracker.clone());

    entries.boot().await?;
    treatments.boot().await?;
    tracing::info!(
        "boot complete: {} entries, {} treatments loaded",
        entries.len(),
        treatments.len()
    );

    let realtime = Arc::new(RealtimeHub::new());
    let auth = Arc::new(AuthorityTable::new(
        config.auth.api_secret_sha1.as_deref(),
        &config.auth.default_role,
    ));
    let query = Arc::new(QueryFacade::new(entries.clone(), treatments));

    let poller = Arc::new(VendorPoller::new(
        &config.vendor.region,
        config.vendor.username.clone(),
        config.vendor.password.clone(),
    ));
    ingest::spawn(
        poller,
        entries,
        devices.clone(),
        realtime.clone(),
        config.vendor.poll_interval_secs,
    );

    let state = AppState {
        query,
        devices,
        realtime,
        auth,
        config: config.clone(),
    };

    let app = http::router(state);

    let addr: SocketAddr = config
        .server
        .listen_addr
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 1337)));
    tracing::info!("glucobridge listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;

    tracker.close();
    if tokio::time::timeout(SHUTDOWN_DRAIN, tracker.wait()).await.is_err() {
        tracing::warn!("shutdown: drain budget exceeded, some flushes may not have completed");
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight flushes");
}
