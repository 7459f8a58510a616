//! Session store (spec §3 "Session", §4.6, §5).
//!
//! "Session store: map from token to session; writes under a mutex, reads
//! lock-free via a consistent snapshot" (spec §5) — backed here by
//! `dashmap`, which gives exactly that: sharded locking on write, snapshot
//! reads without blocking other readers.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;

use crate::error::AppError;
use crate::models::Session;
use crate::repository::{DieselDbContext, SessionRepository};

pub const SESSION_TOKEN_BYTES: usize = 32; // 256 bits of entropy, well above the spec's 128-bit floor.

fn new_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// In-memory session cache, write-through to the metadata DB so sessions
/// survive a restart.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    db: Arc<DieselDbContext>,
    default_ttl: Duration,
}

impl SessionStore {
    pub fn new(db: Arc<DieselDbContext>, default_ttl_hours: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            db,
            default_ttl: Duration::hours(default_ttl_hours),
        }
    }

    /// Mint a new session for `user_id` with a high-entropy opaque token.
    pub async fn create(&self, user_id: &str, source_ip: &str, user_agent: Option<String>) -> Result<Session, AppError> {
        let now = Utc::now();
        let session = Session {
            session_id: new_session_token(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.default_ttl,
            source_ip: source_ip.to_string(),
            user_agent,
        };
        SessionRepository(&self.db)
            .insert(&session)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        self.sessions.insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    /// Validate a presented token. An expired session is rejected and its
    /// cleanup is triggered (spec §3 "Session").
    pub async fn validate(&self, token: &str) -> Result<Session, AppError> {
        let now = Utc::now();
        if let Some(session) = self.sessions.get(token) {
            if session.is_expired(now) {
                drop(session);
                self.invalidate(token).await;
                return Err(AppError::Authentication);
            }
            return Ok(session.clone());
        }

        let session = SessionRepository(&self.db)
            .find(token)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
            .ok_or(AppError::Authentication)?;

        if session.is_expired(now) {
            self.invalidate(token).await;
            return Err(AppError::Authentication);
        }

        self.sessions.insert(token.to_string(), session.clone());
        Ok(session)
    }

    pub async fn invalidate(&self, token: &str) {
        self.sessions.remove(token);
        let _ = SessionRepository(&self.db).delete(token).await;
    }

    /// Periodic cleanup of expired sessions (spec §6
    /// `sessions.cleanup_interval_hours`).
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        self.sessions.retain(|_, s| !s.is_expired(now));
        SessionRepository(&self.db).delete_expired(now).await.unwrap_or(0)
    }

    pub fn expired_at(&self, token: &str) -> Option<DateTime<Utc>> {
        self.sessions.get(token).map(|s| s.expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{pool::DbPool, DieselDbContext};

    async fn test_store() -> SessionStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sessions.db");
        let pool = DbPool::connect(db_path.to_str().unwrap(), 4).await.unwrap();
        let ctx = DieselDbContext::new(pool);
        ctx.init_schema().await.unwrap();
        std::mem::forget(dir); // keep the tempdir alive for the store's lifetime in this test
        SessionStore::new(Arc::new(ctx), 24)
    }

    #[tokio::test]
    async fn created_session_validates_immediately() {
        let store = test_store().await;
        let session = store.create("user-1", "10.0.0.1", None).await.unwrap();
        let fetched = store.validate(&session.session_id).await.unwrap();
        assert_eq!(fetched.user_id, "user-1");
    }

    #[tokio::test]
    async fn invalidated_session_fails_validation() {
        let store = test_store().await;
        let session = store.create("user-1", "10.0.0.1", None).await.unwrap();
        store.invalidate(&session.session_id).await;
        assert!(store.validate(&session.session_id).await.is_err());
    }
}
