//! `/api/pages/ingest`: the entry point a scanning/classification pipeline
//! calls once a page has been classified and field-extracted, to route it
//! through QC or straight into the archive (spec §2 "composition":
//! "routing -> QC -> archive -> merge -> retrieve").

use std::collections::HashMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{AuditAction, Classification, DocType, FieldValue, Page, QcStatus, Sensitivity};
use crate::routing::{self, RoutingInput};
use crate::server::auth::{audit, authenticate, client_ip};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub page_id: String,
    pub owner: String,
    pub year: u16,
    pub doc_type: String,
    pub batch_id: String,
    #[serde(default)]
    pub ocr_text: String,
    #[serde(default)]
    pub fields: HashMap<String, FieldValue>,
    pub confidence: f32,
    pub image_base64: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct IngestResponse {
    pub page_id: String,
    pub severity: crate::models::Severity,
    pub reasons: Vec<String>,
    pub qc_task_id: Option<String>,
    pub metadata_key: String,
}

/// Routes a newly-classified page, then dispatches it to the QC queue
/// (`manual`/`qc` severity) or leaves it archived as `auto` (spec §4.1,
/// §4.2, §4.3). This is the only caller that actually chains `route()`
/// into `enqueue()`/`archive()` outside their own unit tests.
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IngestRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let (user, session) = authenticate(&state, &headers).await?;

    let doc_type: DocType = body.doc_type.parse().map_err(AppError::Validation)?;
    let classification = Classification {
        label: doc_type,
        confidence: body.confidence,
    };

    let decision = routing::route(
        RoutingInput {
            classification: &classification,
            fields: &body.fields,
        },
        &state.required_fields,
    );
    state
        .routing_log
        .record(&body.page_id, &body.owner, doc_type, &decision, Some(user.user_id.clone()));

    let qc_status = match decision.severity {
        crate::models::Severity::Auto => QcStatus::Approved,
        crate::models::Severity::Manual | crate::models::Severity::Qc => QcStatus::Pending,
    };

    let image = match body.image_base64 {
        Some(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| AppError::Validation(format!("invalid image_base64: {e}")))?;
            Some((bytes, body.content_type.unwrap_or_else(|| "application/octet-stream".to_string())))
        }
        None => None,
    };

    let mut page = Page {
        page_id: body.page_id.clone(),
        owner: body.owner.clone(),
        year: body.year,
        doc_type,
        batch_id: body.batch_id.clone(),
        ocr_text: body.ocr_text,
        fields: body.fields,
        classification,
        qc_status,
        sensitivity: Sensitivity::Internal,
        original_sensitivity: Sensitivity::Internal,
        image_key: None,
        created_at: chrono::Utc::now(),
    };
    // `archive()` writes the metadata sidecar before it computes the
    // image's own key, so a caller attaching an image must pre-populate
    // `image_key` with the same canonical key the organiser will use.
    if let Some((_, content_type)) = &image {
        let ext = crate::archive::extension_for(content_type);
        page.image_key = Some(page.canonical_key(ext));
    }

    let outcome = state.organiser.archive(&page, image).await.map_err(AppError::from)?;

    let qc_task_id = if matches!(decision.severity, crate::models::Severity::Manual | crate::models::Severity::Qc) {
        let archived_page = state.organiser.get_page(&body.page_id).await.map_err(AppError::from)?;
        let task_id = state
            .qc_queue
            .enqueue(&archived_page, decision.severity, decision.reasons.clone(), None)
            .map_err(AppError::from)?;
        Some(task_id)
    } else {
        None
    };

    audit(&state, Some(&user), Some(&session), AuditAction::Upload, "page", &body.page_id, true, &ip).await;
    let _ = state
        .hooks
        .fire(
            "document_archived",
            crate::hooks::EventData {
                page_id: Some(body.page_id.clone()),
                batch_id: Some(body.batch_id.clone()),
                qc_status: Some(format!("{:?}", qc_status)),
                ..Default::default()
            },
            crate::hooks::EventMetadata {
                user: Some(user.user_id.clone()),
                ip: Some(ip.clone()),
            },
        )
        .await;

    Ok(Json(IngestResponse {
        page_id: body.page_id,
        severity: decision.severity,
        reasons: decision.reasons,
        qc_task_id,
        metadata_key: outcome.metadata_key,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::auth::hash_password;
    use crate::config::Config;
    use crate::models::{Role, User};
    use crate::repository::UserRepository;
    use crate::server::{create_router, AppState};

    async fn app_with_token() -> (axum::Router, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::env::remove_var("DATABASE_URL");
        let mut config = Config::default();
        config.data_dir = Some(dir.path().display().to_string());
        let settings = crate::config::Settings::from_config(&config);
        let state = AppState::new(settings).await.unwrap();

        let user = User {
            user_id: "user-1".to_string(),
            username: "alice".to_string(),
            password_hash: hash_password("correct horse battery staple").unwrap(),
            department: "records".to_string(),
            clearance_level: 3,
            roles: vec![Role::Operator],
            email: None,
            active: true,
            attributes: Default::default(),
        };
        UserRepository(&state.db).insert(&user).await.unwrap();

        let app = create_router(state);
        let login = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/login")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"username": "alice", "password": "correct horse battery staple"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(login.into_body(), usize::MAX).await.unwrap();
        let token = serde_json::from_slice::<serde_json::Value>(&body).unwrap()["token"]
            .as_str()
            .unwrap()
            .to_string();
        (app, token, dir)
    }

    #[tokio::test]
    async fn high_confidence_ingest_routes_auto_and_skips_qc() {
        let (app, token, _dir) = app_with_token().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/pages/ingest")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(
                        serde_json::json!({
                            "page_id": "PAGE_AUTO",
                            "owner": "acme",
                            "year": 2024,
                            "doc_type": "invoice",
                            "batch_id": "B1",
                            "ocr_text": "total due",
                            "fields": {
                                "invoice_number": {"value": "INV-1", "confidence": 0.99},
                                "amount": {"value": "42.00", "confidence": 0.97}
                            },
                            "confidence": 0.99
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["severity"], "auto");
        assert!(json["qc_task_id"].is_null());
    }

    #[tokio::test]
    async fn low_confidence_ingest_routes_to_qc_and_creates_a_task() {
        let (app, token, _dir) = app_with_token().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/pages/ingest")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(
                        serde_json::json!({
                            "page_id": "PAGE_QC",
                            "owner": "acme",
                            "year": 2024,
                            "doc_type": "invoice",
                            "batch_id": "B2",
                            "ocr_text": "total due",
                            "fields": {},
                            "confidence": 0.5
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["severity"], "qc");
        assert!(json["qc_task_id"].is_string());
    }
}
