//! Session extraction and audit logging for the HTTP layer (spec §4.6,
//! §6 "all requests except /api/auth/login and /api/health require
//! Authorization: Bearer <token>").

use axum::http::HeaderMap;

use crate::error::AppError;
use crate::models::{AuditAction, AuditEvent, Session, User};
use crate::repository::{AuditRepository, UserRepository};

use super::AppState;

/// Pull the bearer token out of `Authorization`, validate it against the
/// session store, and load the owning user. Fails closed with
/// `AppError::Authentication` for any missing/malformed/expired token —
/// the response never reveals which of those applies (spec §7).
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(User, Session), AppError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Authentication)?;

    let session = state.sessions.validate(token).await?;
    let user = UserRepository(&state.db)
        .find_by_id(&session.user_id)
        .await
        .map_err(AppError::from)?
        .ok_or(AppError::Authentication)?;

    if !user.active {
        return Err(AppError::Authentication);
    }

    Ok((user, session))
}

/// Best-effort client IP extraction; falls back to "unknown" rather than
/// failing the request (spec §7: audit logging must not gate responses).
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Record an audit entry. Logged and swallowed on failure: audit logging
/// must never fail the request it describes (spec §4.6).
#[allow(clippy::too_many_arguments)]
pub async fn audit(
    state: &AppState,
    user: Option<&User>,
    session: Option<&Session>,
    action: AuditAction,
    resource_type: &str,
    resource_id: &str,
    allowed: bool,
    ip: &str,
) {
    let event = AuditEvent {
        timestamp: chrono::Utc::now(),
        user_id: user.map(|u| u.user_id.clone()),
        username: user.map(|u| u.username.clone()),
        action,
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        allowed,
        ip_address: ip.to_string(),
        session_id: session.map(|s| s.session_id.clone()),
        user_agent: None,
        metadata: Default::default(),
    };
    if let Err(e) = AuditRepository(&state.db).insert(&event).await {
        tracing::warn!(error = %e, resource_type, resource_id, "failed to record audit event");
    }
}
