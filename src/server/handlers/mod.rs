//! HTTP handlers, grouped the way the routes are (spec §6).

pub mod archive;
pub mod auth;
pub mod ingest;
pub mod qc;
pub mod routing;

use axum::response::IntoResponse;
use axum::Json;

/// `/api/health` — no authentication required.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
