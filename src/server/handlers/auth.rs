//! `/api/auth/*` (spec §6, §4.6): login, logout, and the current session.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::password::verify_password;
use crate::error::AppError;
use crate::models::AuditAction;
use crate::repository::UserRepository;
use crate::server::auth::{audit, authenticate, client_ip};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub user_id: String,
    pub username: String,
}

/// Unlike every other endpoint, this one is reachable without a session —
/// it's what mints one. Failures are rate-limited per source IP (spec
/// §4.6 "Login rate limit") and never distinguish "no such user" from
/// "wrong password" in the response (spec §7).
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);

    if let Some(retry_after) = state.login_rate_limiter.check_login(&ip) {
        return Err(AppError::RateLimit {
            retry_after_secs: retry_after.as_secs(),
        });
    }
    if let Some(retry_after) = state.login_rate_limiter.check_global(&ip) {
        return Err(AppError::RateLimit {
            retry_after_secs: retry_after.as_secs(),
        });
    }

    let user = UserRepository(&state.db)
        .find_by_username(&body.username)
        .await
        .map_err(AppError::from)?;

    let authenticated = user.as_ref().is_some_and(|u| u.active && verify_password(&body.password, &u.password_hash));

    if !authenticated {
        audit(&state, None, None, AuditAction::Create, "session", &body.username, false, &ip).await;
        return Err(AppError::Authentication);
    }
    let user = user.expect("authenticated implies present");

    let session = state.sessions.create(&user.user_id, &ip, headers.get("user-agent").and_then(|v| v.to_str().ok()).map(String::from)).await?;
    audit(&state, Some(&user), Some(&session), AuditAction::Create, "session", &session.session_id, true, &ip).await;

    Ok(Json(LoginResponse {
        token: session.session_id,
        expires_at: session.expires_at,
        user_id: user.user_id,
        username: user.username,
    }))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let (user, session) = authenticate(&state, &headers).await?;
    state.sessions.invalidate(&session.session_id).await;
    audit(&state, Some(&user), Some(&session), AuditAction::Delete, "session", &session.session_id, true, &ip).await;
    Ok(Json(serde_json::json!({ "status": "logged_out" })))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub username: String,
    pub department: String,
    pub clearance_level: u8,
    pub roles: Vec<crate::models::Role>,
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let (user, _session) = authenticate(&state, &headers).await?;
    Ok(Json(MeResponse {
        user_id: user.user_id,
        username: user.username,
        department: user.department,
        clearance_level: user.clearance_level,
        roles: user.roles,
    }))
}
