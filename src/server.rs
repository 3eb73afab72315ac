use anyhow::Result;
use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth,
    billing::{BillingGate, MemoryBillingGate, SqliteBillingGate},
    cache::{CacheStore, LocalCacheStore, MemoryCacheStore},
    config::{BillingBackend, CacheBackend, Config},
    handlers::{self, AppState},
    metrics,
    persist::PersistWorker,
    pipeline::GenerationPipeline,
    pricing::CostCalculator,
    providers::OpenAiImageProvider,
    signals::setup_signal_handlers,
};

/// Start the image gateway server
///
/// This function:
/// 1. Initializes metrics
/// 2. Builds the billing gate, cache, provider and pipeline from configuration
/// 3. Sets up signal handlers for graceful shutdown and pricing reload
/// 4. Serves requests until shutdown, then drains pending cache write-backs
pub async fn start_server(config: Config, config_path: PathBuf) -> Result<()> {
    info!("Initializing Prometheus metrics...");
    let metrics_handle = Arc::new(metrics::init_metrics()?);

    let pipeline = Arc::new(build_pipeline(&config).await?);

    let (shutdown_tx, signal_handle) =
        setup_signal_handlers(config_path, pipeline.costs().clone())?;
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app_state = AppState {
        pipeline: pipeline.clone(),
        limits: config.limits,
    };
    let app = create_router(app_state, metrics_handle);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let backends = pipeline.backends();
    info!("Starting image gateway on {}", addr);
    info!(
        billing = %backends.billing,
        cache = %backends.cache,
        provider = %backends.provider,
        coalesce_in_flight = backends.coalesce_in_flight,
        "Configuration: {} API keys",
        config.api_keys.len()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    // Requests are done; finish every queued write-back before exiting
    pipeline.persist().shutdown().await;

    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Wire the pipeline's collaborators from configuration
pub async fn build_pipeline(config: &Config) -> Result<GenerationPipeline> {
    let costs = Arc::new(CostCalculator::new(config.pricing.to_table()?));
    let billing = build_billing_gate(config).await?;
    let cache = build_cache_store(config).await?;
    let provider = Arc::new(OpenAiImageProvider::new(config.provider.clone())?);
    let persist = PersistWorker::spawn(cache.clone(), config.cache.persist_queue_size);

    Ok(
        GenerationPipeline::new(billing, cache, provider, costs, persist)
            .with_cache_control(config.cache.cache_control.clone())
            .with_coalescing(config.pipeline.coalesce_in_flight),
    )
}

async fn build_billing_gate(config: &Config) -> Result<Arc<dyn BillingGate>> {
    Ok(match config.billing.backend {
        BillingBackend::Memory => Arc::new(MemoryBillingGate::from_api_keys(&config.api_keys)),
        BillingBackend::Sqlite => {
            let gate = SqliteBillingGate::connect(&config.billing.database_path).await?;
            gate.seed_from_config(&config.api_keys).await?;
            Arc::new(gate)
        }
    })
}

async fn build_cache_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    Ok(match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
        CacheBackend::Local => Arc::new(LocalCacheStore::new(&config.cache.directory).await?),
    })
}

/// Create the Axum router with all routes and middleware
pub fn create_router(
    app_state: AppState,
    metrics_handle: Arc<metrics_exporter_prometheus::PrometheusHandle>,
) -> Router {
    // Every API route sees a CallerContext; the pipeline decides what it may do
    let api_routes = Router::new()
        .route(
            "/v1/images/:quality/:size/*prompt",
            get(handlers::images::handle_image),
        )
        .route(
            "/v1/quote/:quality/:size/*prompt",
            get(handlers::quote::handle_quote),
        )
        .route("/v1/artifacts/*key", get(handlers::artifacts::get_artifact))
        .route("/v1/balance", get(handlers::balance::get_balance))
        .layer(middleware::from_fn(auth::caller_middleware))
        .route("/ready", get(handlers::health::readiness_check))
        .with_state(app_state);

    Router::new()
        // Public endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(metrics_handle)
        .merge(api_routes)
        // All routes are GETs; nothing legitimate sends a large body
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
}
