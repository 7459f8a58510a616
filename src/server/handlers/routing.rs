//! `/api/routing/*` (spec §6, §4.1): reporting over recorded routing
//! decisions.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{DocType, Severity};
use crate::server::auth::authenticate;
use crate::server::AppState;

fn parse_severity(s: &str) -> Option<Severity> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Some(Severity::Auto),
        "manual" => Some(Severity::Manual),
        "qc" => Some(Severity::Qc),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub days: Option<i64>,
    pub doc_type: Option<String>,
    pub severity: Option<String>,
    pub operator: Option<String>,
}

pub async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SummaryParams>,
) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    let doc_type = params.doc_type.as_deref().and_then(|s| s.parse::<DocType>().ok());
    let severity = params.severity.as_deref().and_then(parse_severity);
    let summary = state.routing_log.summary(params.days, doc_type, severity, params.operator.as_deref());
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub limit: Option<usize>,
}

pub async fn recent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RecentParams>,
) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    let entries = state.routing_log.recent(params.limit.unwrap_or(100));
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct TrendsParams {
    pub days: Option<i64>,
}

pub async fn trends(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TrendsParams>,
) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    let points = state.routing_log.trends(params.days.unwrap_or(30));
    Ok(Json(points))
}
