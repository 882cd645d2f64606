// Main entry point for the menu image-resolution backend

use dishlens::{
    core::{types::MenuItemRequest, Config},
    middleware::{RateLimiter, RateLimiterConfig, RetryPolicy},
    orchestration::ImageResolver,
    services::{
        cache::{ImageCacheService, KeywordClassifier},
        generation::{GenerativeFallback, OpenAiImageClient},
        progress::ProgressTracker,
        search::{GoogleCseClient, WebImageSearcher},
        semantic::SemanticMatcher,
        storage::{
            DisabledStorage, HttpMetadataStore, HttpObjectStorage, MetadataStore, ObjectStorage,
        },
    },
    utils::Metrics,
};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    resolver: Arc<ImageResolver>,
    tracker: ProgressTracker,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new()?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "dishlens={}",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== DISHLENS IMAGE RESOLUTION BACKEND ===");
    info!(
        "Config: search={} generation={} semantic={} storage={} rate_limit={}/{}s",
        if config.search.is_configured() { "ON" } else { "OFF" },
        if config.generation.is_configured() { "ON" } else { "OFF" },
        if config.semantic.enabled { "ON" } else { "OFF" },
        if config.storage.is_configured() { "ON" } else { "OFF" },
        config.rate_limit.max_requests,
        config.rate_limit.window_seconds,
    );

    let metrics = Metrics::new();
    let tracker = ProgressTracker::new();

    // Storage collaborators
    let (objects, records): (Arc<dyn ObjectStorage>, Arc<dyn MetadataStore>) =
        if config.storage.is_configured() {
            let objects = HttpObjectStorage::new(
                &config.storage,
                config.cache.bucket.clone(),
                config.http.request_timeout,
            );
            let records = HttpMetadataStore::new(&config.storage, config.http.request_timeout);
            match (objects, records) {
                (Some(o), Some(r)) => (Arc::new(o), Arc::new(r)),
                _ => {
                    warn!("Storage client construction failed, cache layer disabled");
                    (Arc::new(DisabledStorage), Arc::new(DisabledStorage))
                }
            }
        } else {
            warn!("Storage not configured, cache layer disabled");
            (Arc::new(DisabledStorage), Arc::new(DisabledStorage))
        };

    // Pipeline services
    let cache = Arc::new(ImageCacheService::new(
        objects,
        Arc::clone(&records),
        Arc::new(KeywordClassifier),
        &config.cache,
        Some(metrics.clone()),
    ));

    // The embedding index is an external collaborator wired in by the
    // deployment; without one the semantic stage skips every item
    let semantic = Arc::new(SemanticMatcher::new(None, records, &config.semantic));

    let search_provider = GoogleCseClient::new(&config.search, &config.http)
        .map(|c| Arc::new(c) as Arc<dyn dishlens::services::search::SearchProvider>);
    let searcher = Arc::new(WebImageSearcher::new(
        search_provider,
        Arc::clone(&cache),
        Some(metrics.clone()),
    ));

    let generation_provider = OpenAiImageClient::new(&config.generation, &config.http)
        .map(|c| Arc::new(c) as Arc<dyn dishlens::services::generation::GenerationProvider>);
    let limiter = RateLimiter::new(RateLimiterConfig {
        max_requests: config.rate_limit.max_requests,
        window: std::time::Duration::from_secs(config.rate_limit.window_seconds),
    });
    let generator = Arc::new(GenerativeFallback::new(
        generation_provider,
        limiter,
        RetryPolicy::new(config.generation.max_retries),
        Arc::clone(&cache),
        config.pipeline.placeholder_url.clone(),
        Some(metrics.clone()),
    ));

    let resolver = Arc::new(ImageResolver::new(
        cache,
        semantic,
        searcher,
        generator,
        tracker.clone(),
        config.pipeline.max_concurrent_items,
        config.pipeline.images_per_item,
        Some(metrics.clone()),
    ));

    let state = AppState {
        resolver,
        tracker,
        metrics,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create router with monitoring endpoints
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/resolve", post(resolve_menu))
        .route("/progress/:task_id", get(progress_snapshot))
        .route("/progress/:task_id/stream", get(progress_stream))
        .with_state(state)
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                        - Root endpoint");
    info!("  GET  /health                  - Health check");
    info!("  GET  /metrics                 - Prometheus metrics");
    info!("  GET  /stats                   - Detailed statistics");
    info!("  POST /resolve                 - Resolve images for extracted menu items");
    info!("  GET  /progress/:task_id       - Progress snapshot");
    info!("  GET  /progress/:task_id/stream - Live progress stream (SSE)");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> &'static str {
    "Dishlens Menu Image Resolution Backend"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

#[derive(Debug, Deserialize)]
struct ResolveItem {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    items: Vec<ResolveItem>,
    /// Client-chosen task id. Supplying one lets the client open the
    /// progress stream before posting; subscriptions attach before the
    /// task record exists.
    #[serde(default)]
    task_id: Option<String>,
}

/// Resolve images for a list of already-extracted menu items.
async fn resolve_menu(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if request.items.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No items provided".to_string()));
    }

    state.metrics.record_endpoint_request("/resolve");

    let task_id = request
        .task_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let items: Vec<MenuItemRequest> = request
        .items
        .into_iter()
        .map(|item| MenuItemRequest {
            id: item.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: item.name,
            description: item.description,
        })
        .collect();

    let (images, summary) = state
        .resolver
        .resolve_with_summary(&task_id, &items)
        .await
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;

    Ok(Json(serde_json::json!({
        "task_id": task_id,
        "images": images,
        "summary": summary,
    })))
}

/// Progress snapshot; 404 after eviction.
async fn progress_snapshot(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match state.tracker.get_progress(&task_id) {
        Some(snapshot) => Ok(Json(serde_json::to_value(snapshot).map_err(|e| {
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?)),
        None => Err((StatusCode::NOT_FOUND, format!("Task {} not found", task_id))),
    }
}

/// Live progress stream over SSE.
///
/// The subscription is removed automatically when the client disconnects:
/// dropping the stream closes the channel and the tracker prunes closed
/// subscribers on the next notification.
async fn progress_stream(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let (_subscription, rx) = state.tracker.subscribe(&task_id);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let snapshot = rx.recv().await?;
        let event = Event::default()
            .json_data(&snapshot)
            .unwrap_or_else(|_| Event::default().data("{}"));
        Some((Ok::<_, Infallible>(event), rx))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
