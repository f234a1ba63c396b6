use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, http::HeaderValue, middleware, routing::get};
use serde::Serialize;
use slidescope_server::catalog::{Catalog, CatalogAppState, catalog_routes};
use slidescope_server::config::Config;
use slidescope_server::deepzoom::{PyramidOptions, TileFormat};
use slidescope_server::slide::{
    DeepZoomAppState, DeepZoomCache, DeepZoomService, OpenSlideOpener, SlideOpener,
    TileCacheConfig, deepzoom_routes,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Attach a fresh request id to every response
async fn request_id(
    request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let id = Uuid::new_v4().to_string();
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slidescope=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SlideScope...");

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}, tile_size={}, tile_overlap={}",
        config.host, config.port, config.deepzoom.tile_size, config.deepzoom.tile_overlap
    );

    let options = PyramidOptions {
        tile_size: config.deepzoom.tile_size,
        tile_overlap: config.deepzoom.tile_overlap,
        respect_bounds: config.deepzoom.respect_bounds,
        format: TileFormat::parse(&config.deepzoom.format)
            .map_err(|e| anyhow::anyhow!("invalid TILE_FORMAT: {}", e))?,
    };

    // Load the image catalog
    let catalog = match &config.catalog_manifest {
        Some(path) => Arc::new(Catalog::load_manifest(path)?),
        None => Arc::new(Catalog::new()),
    };
    info!("Catalog holds {} images", catalog.len());

    // Create the slide cache and its sweeper
    let opener: Arc<dyn SlideOpener> = Arc::new(OpenSlideOpener);
    let cache = Arc::new(DeepZoomCache::new(
        Arc::clone(&opener),
        config.cache.ttl,
        config.cache.sweep_interval,
    ));

    let service = Arc::new(DeepZoomService::new(
        Arc::clone(&cache),
        Arc::clone(&catalog),
        TileCacheConfig {
            max_size_bytes: config.tile_cache_max_bytes,
        },
        options,
    ));

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .route("/health", get(health))
        .nest(
            "/deepzoom",
            deepzoom_routes(DeepZoomAppState {
                service: Arc::clone(&service),
            }),
        )
        .nest(
            "/api/v1",
            catalog_routes(CatalogAppState { catalog, opener }),
        )
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("SlideScope server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown: emptying slide cache");
    cache.shutdown().await;
    info!("Server exiting");

    Ok(())
}
