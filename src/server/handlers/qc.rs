//! `/api/qc/*` (spec §6, §4.2): the manual review queue.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::auth::policy::{evaluate, ResourceAttributes};
use crate::error::AppError;
use crate::models::{AuditAction, QcStatus, Severity, Verdict, VerdictAction};
use crate::qc::summarize_feedback;
use crate::server::auth::{audit, authenticate, client_ip};
use crate::server::AppState;

fn parse_severity(s: &str) -> Option<Severity> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Some(Severity::Auto),
        "manual" => Some(Severity::Manual),
        "qc" => Some(Severity::Qc),
        _ => None,
    }
}

pub async fn queue_stats(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.qc_queue.stats()))
}

#[derive(Debug, Deserialize)]
pub struct PendingParams {
    pub severity: Option<String>,
    pub limit: Option<usize>,
}

pub async fn queue_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PendingParams>,
) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    let severity = params.severity.as_deref().and_then(parse_severity);
    Ok(Json(state.qc_queue.pending(severity, params.limit.unwrap_or(50))))
}

/// Assigns the next eligible task to the calling operator.
pub async fn task_next(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let (user, _session) = authenticate(&state, &headers).await?;
    let task = state.qc_queue.next_task(&user.user_id).map_err(AppError::from)?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub approved: bool,
    pub corrected_doc_type: Option<crate::models::DocType>,
    #[serde(default)]
    pub field_corrections: Vec<crate::models::FieldCorrection>,
    #[serde(default)]
    pub issue_categories: Vec<String>,
    pub operator_confidence: f32,
    pub time_spent_seconds: u64,
    pub notes: Option<String>,
    pub action: VerdictAction,
}

/// Submits a verdict for a locked task. The operator identity always comes
/// from the session, never the request body, so a caller can't submit on
/// another operator's behalf (spec §4.2 "lock must match the holder").
pub async fn task_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Json(body): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let (user, session) = authenticate(&state, &headers).await?;

    let verdict = Verdict {
        operator_id: user.user_id.clone(),
        approved: body.approved,
        corrected_doc_type: body.corrected_doc_type,
        field_corrections: body.field_corrections,
        issue_categories: body.issue_categories,
        operator_confidence: body.operator_confidence,
        time_spent_seconds: body.time_spent_seconds,
        notes: body.notes,
        action: body.action,
    };

    let updated = state.qc_queue.submit(&task_id, verdict).await.map_err(AppError::from)?;
    reconcile_page_status(&state, &updated.page_id, updated.status, body.corrected_doc_type).await;

    audit(&state, Some(&user), Some(&session), AuditAction::Edit, "qc_task", &task_id, true, &ip).await;

    let event = match body.action {
        VerdictAction::Approve => "qc_approved",
        VerdictAction::Reject => "qc_rejected",
        _ => "qc_rejected",
    };
    if matches!(body.action, VerdictAction::Approve | VerdictAction::Reject) {
        let _ = state
            .hooks
            .fire(
                event,
                crate::hooks::EventData {
                    page_id: Some(updated.page_id.clone()),
                    qc_status: Some(format!("{:?}", updated.status)),
                    ..Default::default()
                },
                crate::hooks::EventMetadata {
                    user: Some(user.user_id.clone()),
                    ip: Some(ip.clone()),
                },
            )
            .await;
    }

    Ok(Json(updated))
}

/// Releases a locked task back to the pool without recording a verdict.
pub async fn task_release(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let (user, session) = authenticate(&state, &headers).await?;

    let verdict = Verdict {
        operator_id: user.user_id.clone(),
        approved: false,
        corrected_doc_type: None,
        field_corrections: vec![],
        issue_categories: vec![],
        operator_confidence: 0.0,
        time_spent_seconds: 0,
        notes: None,
        action: VerdictAction::Release,
    };
    let updated = state.qc_queue.submit(&task_id, verdict).await.map_err(AppError::from)?;
    audit(&state, Some(&user), Some(&session), AuditAction::Edit, "qc_task", &task_id, true, &ip).await;
    Ok(Json(updated))
}

/// Best-effort: push the QC verdict's doc-type/status correction back onto
/// the archived page so the archive search index stays current. Failures
/// here don't fail the submit call itself — the QC task log is the
/// authoritative record (spec §4.2).
async fn reconcile_page_status(
    state: &AppState,
    page_id: &str,
    task_status: crate::models::QcTaskStatus,
    corrected_doc_type: Option<crate::models::DocType>,
) {
    let Ok(mut page) = state.organiser.get_page(page_id).await else {
        return;
    };
    page.qc_status = match task_status {
        crate::models::QcTaskStatus::Completed => QcStatus::Approved,
        crate::models::QcTaskStatus::Rejected => QcStatus::Rejected,
        crate::models::QcTaskStatus::Escalated => QcStatus::Escalated,
        _ => page.qc_status,
    };
    if let Some(doc_type) = corrected_doc_type {
        page.doc_type = doc_type;
    }
    if let Err(e) = state.organiser.archive(&page, None).await {
        tracing::warn!(error = %e, page_id, "failed to reconcile page status after qc verdict");
        state.organiser.mark_dirty(&page).await;
    }
}

/// Serves a page's source image, gated by the ABAC policy (spec §4.6,
/// §6 "/api/qc/image/{path}").
pub async fn image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(page_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let (user, session) = authenticate(&state, &headers).await?;

    let page = state.organiser.get_page(&page_id).await.map_err(AppError::from)?;
    let resource = ResourceAttributes {
        confidentiality: page.sensitivity.level(),
        department: page.owner.clone(),
        owner_id: page.owner.clone(),
    };
    let decision = evaluate(&user, &resource);
    audit(&state, Some(&user), Some(&session), AuditAction::View, "page_image", &page_id, decision.allowed, &ip).await;
    if !decision.allowed {
        return Err(AppError::Authorisation(decision.reason.to_string()));
    }

    let payload = state.organiser.get_image(&page_id).await.map_err(AppError::from)?;
    let mut response = payload.bytes.into_response();
    if let Ok(value) = HeaderValue::from_str(&payload.content_type) {
        response.headers_mut().insert(axum::http::header::CONTENT_TYPE, value);
    }
    Ok(response)
}

pub async fn feedback_stats(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    let records = state
        .qc_queue
        .feedback_records()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(summarize_feedback(&records)))
}

pub async fn operator_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(operator_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.qc_queue.operator_stats(&operator_id)))
}
