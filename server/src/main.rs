use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wsibrowse_server::cache::{LocalBackend, RedisBackend, TieredCache};
use wsibrowse_server::catalog::{CatalogAppState, CatalogService, PathResolver, catalog_routes};
use wsibrowse_server::config::Config;
use wsibrowse_server::slide::{SlideAppState, TileProducer, dzi_routes, slide_api_routes};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

fn setup_prometheus_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    let handle = PROMETHEUS_HANDLE
        .get()
        .expect("Prometheus handle not initialized");
    handle.render()
}

#[derive(Clone)]
struct HealthState {
    cache: Arc<TieredCache>,
    producer: Arc<TileProducer>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    cache_backend: &'static str,
    shared_tier_configured: bool,
    shared_tier_degraded: bool,
    decode_queue: usize,
    uptime_seconds: u64,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    let shared_configured = state.cache.shared_configured();
    let degraded = state.cache.degraded().await;

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" },
        version: env!("CARGO_PKG_VERSION"),
        cache_backend: if shared_configured { "tiered" } else { "local" },
        shared_tier_configured: shared_configured,
        shared_tier_degraded: degraded,
        decode_queue: state.producer.decode_queue_len(),
        uptime_seconds: uptime,
    })
}

/// Update gauge metrics (called periodically)
async fn update_gauge_metrics(state: &HealthState) {
    metrics::gauge!("wsibrowse_local_cache_entries").set(state.cache.local().len().await as f64);
    metrics::gauge!("wsibrowse_decode_queue").set(state.producer.decode_queue_len() as f64);

    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
    metrics::gauge!("wsibrowse_uptime_seconds").set(uptime as f64);
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    START_TIME.set(Instant::now()).ok();

    // Must be installed before any metrics are recorded
    let prometheus_handle = setup_prometheus_metrics();
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wsibrowse=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}, roots={}",
        config.host,
        config.port,
        config.roots.len()
    );
    if config.roots.is_empty() {
        warn!("No slide roots configured (set WSI_ROOTS) - the catalog will be empty");
    }
    for root in &config.roots {
        if !root.path.is_dir() {
            warn!("Slide root {:?} ({}) does not exist", root.path, root.label);
        }
    }

    // Local tier always runs; it carries the full load when Redis is absent
    let local = Arc::new(LocalBackend::with_snapshot(
        config.cache.local_capacity,
        config.cache.snapshot_path.clone(),
    ));
    local.load_snapshot().await;
    info!("Local cache tier ready ({} entries restored)", local.len().await);

    let shared = if config.cache.shared_enabled {
        match RedisBackend::connect(&config.cache.redis_url, config.cache.shared_timeout).await {
            Ok(backend) => {
                info!("Shared cache tier connected: {}", config.cache.redis_url);
                Some(Arc::new(backend) as Arc<dyn wsibrowse_server::CacheBackend>)
            }
            Err(e) => {
                warn!(
                    "Shared cache tier unavailable ({}), continuing on the local tier: {}",
                    config.cache.redis_url, e
                );
                None
            }
        }
    } else {
        None
    };

    let cache = Arc::new(TieredCache::new(
        shared,
        Arc::clone(&local),
        config.cache.write_through,
    ));

    let resolver = Arc::new(PathResolver::new(
        Arc::clone(&cache),
        config.roots.iter().map(|r| r.path.clone()).collect(),
        config.extensions.clone(),
        config.exclude.clone(),
    ));
    let catalog = Arc::new(CatalogService::new(
        Arc::clone(&cache),
        Arc::clone(&resolver),
        &config,
    ));
    let producer = Arc::new(TileProducer::new(
        Arc::clone(&cache),
        Arc::clone(&resolver),
        &config,
    ));

    let health_state = HealthState {
        cache: Arc::clone(&cache),
        producer: Arc::clone(&producer),
    };

    // Periodic local-tier snapshot
    let snapshot_local = Arc::clone(&local);
    let snapshot_interval = config.cache.snapshot_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(snapshot_interval);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            snapshot_local.save_snapshot().await;
        }
    });

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = health_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state).await;
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let slide_state = SlideAppState {
        producer: Arc::clone(&producer),
    };
    let catalog_state = CatalogAppState { catalog };

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .with_state(health_state)
        .merge(
            Router::new()
                .nest(
                    "/api",
                    catalog_routes(catalog_state).merge(slide_api_routes(slide_state.clone())),
                )
                .nest("/dzi", dzi_routes(slide_state)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("wsibrowse server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Persist the local tier so a restart begins warm
    local.save_snapshot().await;
    info!("Local cache snapshot saved, exiting");

    Ok(())
}
