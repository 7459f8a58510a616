//! `/api/archive/*` (spec §6, §4.3, §4.4): search, retrieval, thumbnails,
//! and batch merging.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::archive::index::SearchQuery;
use crate::archive::thumbnail::ThumbnailSize;
use crate::auth::policy::{evaluate, ResourceAttributes};
use crate::error::AppError;
use crate::models::{AuditAction, DocType, QcStatus};
use crate::server::auth::{audit, authenticate, client_ip};
use crate::server::AppState;

pub async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    Ok(Json(serde_json::json!({
        "page_count": state.organiser.page_count().await,
        "owners": state.organiser.distinct_owners().await,
        "years": state.organiser.distinct_years().await,
        "doc_types": state.organiser.distinct_doc_types().await,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub text: Option<String>,
    pub owner: Option<String>,
    pub year: Option<u16>,
    pub doc_type: Option<String>,
    pub batch_id: Option<String>,
    pub qc_status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn parse_qc_status(s: &str) -> Option<QcStatus> {
    match s.to_ascii_lowercase().as_str() {
        "pending" => Some(QcStatus::Pending),
        "approved" => Some(QcStatus::Approved),
        "rejected" => Some(QcStatus::Rejected),
        "escalated" => Some(QcStatus::Escalated),
        _ => None,
    }
}

pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    let query = SearchQuery {
        text: params.text,
        owner: params.owner,
        year: params.year,
        doc_type: params.doc_type.as_deref().and_then(|s| s.parse::<DocType>().ok()),
        batch_id: params.batch_id,
        qc_status: params.qc_status.as_deref().and_then(parse_qc_status),
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
    };
    Ok(Json(state.organiser.search(&query).await))
}

/// Resource-attribute gate shared by the document and thumbnail handlers
/// (spec §4.6): a page's owner stands in for both its ABAC department and
/// its resource owner, since the archive doesn't model a separate
/// department dimension.
fn page_resource(page: &crate::models::Page) -> ResourceAttributes {
    ResourceAttributes {
        confidentiality: page.sensitivity.level(),
        department: page.owner.clone(),
        owner_id: page.owner.clone(),
    }
}

pub async fn document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(page_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let (user, session) = authenticate(&state, &headers).await?;

    let page = state.organiser.get_page(&page_id).await.map_err(AppError::from)?;
    let decision = evaluate(&user, &page_resource(&page));
    audit(&state, Some(&user), Some(&session), AuditAction::View, "document", &page_id, decision.allowed, &ip).await;
    if !decision.allowed {
        return Err(AppError::Authorisation(decision.reason.to_string()));
    }

    let _ = state
        .hooks
        .fire(
            "document_retrieved",
            crate::hooks::EventData {
                page_id: Some(page_id.clone()),
                ..Default::default()
            },
            crate::hooks::EventMetadata {
                user: Some(user.user_id.clone()),
                ip: Some(ip.clone()),
            },
        )
        .await;

    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailParams {
    pub size: Option<String>,
    #[serde(default)]
    pub force: bool,
}

pub async fn thumbnail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(page_id): Path<String>,
    Query(params): Query<ThumbnailParams>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let (user, session) = authenticate(&state, &headers).await?;

    let page = state.organiser.get_page(&page_id).await.map_err(AppError::from)?;
    let decision = evaluate(&user, &page_resource(&page));
    audit(&state, Some(&user), Some(&session), AuditAction::View, "thumbnail", &page_id, decision.allowed, &ip).await;
    if !decision.allowed {
        return Err(AppError::Authorisation(decision.reason.to_string()));
    }

    let size: ThumbnailSize = params
        .size
        .as_deref()
        .unwrap_or("small")
        .parse()
        .map_err(AppError::Validation)?;
    let bytes = state.organiser.thumbnail(&page_id, size, params.force).await.map_err(AppError::from)?;

    let mut response = bytes.into_response();
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    Ok(response)
}

pub async fn owners(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.organiser.distinct_owners().await))
}

pub async fn doc_types(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.organiser.distinct_doc_types().await))
}

pub async fn years(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.organiser.distinct_years().await))
}

#[derive(Debug, Deserialize)]
pub struct SealBatchRequest {
    pub owner: String,
    pub year: u16,
    pub doc_type: String,
    pub batch_id: String,
}

/// Closes a batch to new pages and marks it merge-eligible (spec §3
/// "Batch": `open -> sealed`). `BatchMerger::merge` refuses to run against
/// a batch that hasn't been sealed.
pub async fn seal_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SealBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let (user, session) = authenticate(&state, &headers).await?;

    let doc_type: DocType = body.doc_type.parse().map_err(AppError::Validation)?;
    let batch = state
        .organiser
        .batch_registry()
        .seal(&body.owner, body.year, doc_type, &body.batch_id)
        .await
        .map_err(AppError::from)?;

    audit(&state, Some(&user), Some(&session), AuditAction::Edit, "batch", &body.batch_id, true, &ip).await;
    let _ = state
        .hooks
        .fire(
            "batch_sealed",
            crate::hooks::EventData {
                batch_id: Some(body.batch_id.clone()),
                ..Default::default()
            },
            crate::hooks::EventMetadata {
                user: Some(user.user_id.clone()),
                ip: Some(ip.clone()),
            },
        )
        .await;

    Ok(Json(batch))
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub owner: String,
    pub year: u16,
    pub doc_type: String,
    pub batch_id: String,
}

pub async fn merge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MergeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let (user, session) = authenticate(&state, &headers).await?;

    let doc_type: DocType = body.doc_type.parse().map_err(AppError::Validation)?;
    let outcome = state
        .merger
        .merge(&body.owner, body.year, doc_type, &body.batch_id)
        .await
        .map_err(AppError::from)?;

    audit(&state, Some(&user), Some(&session), AuditAction::Export, "batch", &body.batch_id, true, &ip).await;
    let _ = state
        .hooks
        .fire(
            "batch_completed",
            crate::hooks::EventData {
                batch_id: Some(body.batch_id.clone()),
                ..Default::default()
            },
            crate::hooks::EventMetadata {
                user: Some(user.user_id.clone()),
                ip: Some(ip.clone()),
            },
        )
        .await;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct GenerateThumbnailsRequest {
    pub batch_id: String,
    #[serde(default)]
    pub force: bool,
}

pub async fn generate_thumbnails(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GenerateThumbnailsRequest>,
) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    let processed = state
        .organiser
        .regenerate_thumbnails_for_batch(&body.batch_id, body.force)
        .await
        .map_err(AppError::from)?;
    Ok(Json(serde_json::json!({ "pages_processed": processed })))
}
