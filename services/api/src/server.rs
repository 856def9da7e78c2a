use crate::cli::ServeArgs;
use crate::infra::{spawn_session_sweeper, AppState, SessionRegistry};
use crate::routes;
use axum_prometheus::PrometheusMetricLayer;
use estate_access::access::ConfirmingActuator;
use estate_access::config::AppConfig;
use estate_access::error::AppError;
use estate_access::listings::EstateCatalog;
use estate_access::saved::{BlobStore, FileBlobStore, SavedItemStore};
use estate_access::telemetry::{self, LogTarget};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, LogTarget::Stdout)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = build_state(
        &config,
        readiness_flag.clone(),
        Some(Arc::new(prometheus_handle)),
    )?;

    let sweeper = spawn_session_sweeper(state.sessions.clone());
    let app = routes::router(state).layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "estate access service ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    sweeper.abort();
    info!("estate access service stopped");
    Ok(())
}

pub(crate) fn load_catalog(config: &AppConfig) -> Result<EstateCatalog, AppError> {
    let catalog = match &config.storage.catalog_path {
        Some(path) => EstateCatalog::from_path(path)?,
        None => EstateCatalog::sample()?,
    };
    Ok(catalog)
}

pub(crate) fn open_saved_store(
    config: &AppConfig,
) -> Result<SavedItemStore<dyn BlobStore>, AppError> {
    let blobs: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(&config.storage.data_dir));
    let (store, loaded) = SavedItemStore::open(blobs)?;
    if loaded.corrupt.is_none() {
        info!(
            data_dir = %config.storage.data_dir.display(),
            saved = loaded.items.len(),
            "saved listings loaded"
        );
    }
    Ok(store)
}

pub(crate) fn build_state(
    config: &AppConfig,
    readiness: Arc<AtomicBool>,
    metrics: Option<Arc<PrometheusHandle>>,
) -> Result<AppState, AppError> {
    Ok(AppState {
        readiness,
        metrics,
        catalog: Arc::new(load_catalog(config)?),
        saved: Arc::new(open_saved_store(config)?),
        sessions: Arc::new(SessionRegistry::new(config.geofence.session_idle_timeout)),
        geofence: config.geofence.clone(),
        actuator: Arc::new(ConfirmingActuator),
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
