//! Router configuration for the web server (spec §6 "External interfaces").

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Create the main router with every endpoint from the HTTP interface table.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        // Ingest pipeline: routing -> QC / archive
        .route("/api/pages/ingest", post(handlers::ingest::ingest))
        // Auth
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/me", get(handlers::auth::me))
        // Routing engine
        .route("/api/routing/summary", get(handlers::routing::summary))
        .route("/api/routing/recent", get(handlers::routing::recent))
        .route("/api/routing/trends", get(handlers::routing::trends))
        // QC task queue
        .route("/api/qc/queue/stats", get(handlers::qc::queue_stats))
        .route("/api/qc/queue/pending", get(handlers::qc::queue_pending))
        .route("/api/qc/task/next", get(handlers::qc::task_next))
        .route("/api/qc/task/:id/submit", post(handlers::qc::task_submit))
        .route("/api/qc/task/:id/release", post(handlers::qc::task_release))
        .route("/api/qc/image/*path", get(handlers::qc::image))
        .route("/api/qc/feedback/stats", get(handlers::qc::feedback_stats))
        .route("/api/qc/operator/:id/stats", get(handlers::qc::operator_stats))
        // Archive organiser / batch merger
        .route("/api/archive/stats", get(handlers::archive::stats))
        .route("/api/archive/search", get(handlers::archive::search))
        .route("/api/archive/document/:page_id", get(handlers::archive::document))
        .route("/api/archive/thumbnail/:page_id", get(handlers::archive::thumbnail))
        .route("/api/archive/owners", get(handlers::archive::owners))
        .route("/api/archive/doc_types", get(handlers::archive::doc_types))
        .route("/api/archive/years", get(handlers::archive::years))
        .route("/api/archive/batch/seal", post(handlers::archive::seal_batch))
        .route("/api/archive/merge", post(handlers::archive::merge))
        .route("/api/archive/thumbnails/generate", post(handlers::archive::generate_thumbnails))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
