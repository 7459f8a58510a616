//! Metadata DB repositories (spec §4.5): `objects`, `versions`, `audit`,
//! `hooks`, plus the `users`/`sessions` tables backing the authorisation
//! core (spec §4.6).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Bool, Integer, Nullable, Text};
use diesel_async::RunQueryDsl;

use crate::error::RepositoryError;
use crate::models::{
    AuditAction, AuditEvent, HookExecution, HookRegistration, HookType, Role, Session, StoredObject, User, Version,
};

use super::context::DieselDbContext;
use super::rows::{
    AuditRow, ConfigHistoryRow, HookExecutionRow, HookRegistrationRow, ObjectRow, SessionRow, UserRow, VersionRow,
};
use super::util::to_diesel_error;
use crate::with_conn;

/// Maximum number of configuration snapshots to retain (spec §9 ambient
/// "Configuration" section: DB-stored config history).
const MAX_CONFIG_HISTORY_ENTRIES: i64 = 16;

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

/// Repository over the `users` table.
pub struct UserRepository<'a>(pub &'a DieselDbContext);

impl UserRepository<'_> {
    pub async fn insert(&self, user: &User) -> Result<(), RepositoryError> {
        let roles = serde_json::to_string(&user.roles).map_err(|e| RepositoryError::Query(e.to_string()))?;
        let attributes = serde_json::to_string(&user.attributes).map_err(|e| RepositoryError::Query(e.to_string()))?;
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query(
                "INSERT INTO users (user_id, username, password_hash, department, clearance_level, roles, email, active, attributes) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind::<Text, _>(&user.user_id)
            .bind::<Text, _>(&user.username)
            .bind::<Text, _>(&user.password_hash)
            .bind::<Text, _>(&user.department)
            .bind::<Integer, _>(user.clearance_level as i32)
            .bind::<Text, _>(&roles)
            .bind::<Nullable<Text>, _>(&user.email)
            .bind::<Bool, _>(user.active)
            .bind::<Text, _>(&attributes)
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(())
        })
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<UserRow> = diesel::sql_query("SELECT * FROM users WHERE username = ?")
                .bind::<Text, _>(username)
                .load(&mut conn)
                .await
                .map_err(to_diesel_error)?;
            Ok(rows.into_iter().next().map(row_to_user))
        })
    }

    pub async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<UserRow> = diesel::sql_query("SELECT * FROM users WHERE user_id = ?")
                .bind::<Text, _>(user_id)
                .load(&mut conn)
                .await
                .map_err(to_diesel_error)?;
            Ok(rows.into_iter().next().map(row_to_user))
        })
    }
}

fn row_to_user(row: UserRow) -> User {
    User {
        user_id: row.user_id,
        username: row.username,
        password_hash: row.password_hash,
        department: row.department,
        clearance_level: row.clearance_level.clamp(0, 3) as u8,
        roles: serde_json::from_str::<Vec<Role>>(&row.roles).unwrap_or_default(),
        email: row.email,
        active: row.active,
        attributes: serde_json::from_str::<HashMap<String, String>>(&row.attributes).unwrap_or_default(),
    }
}

/// Repository over the `sessions` table.
pub struct SessionRepository<'a>(pub &'a DieselDbContext);

impl SessionRepository<'_> {
    pub async fn insert(&self, session: &Session) -> Result<(), RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query(
                "INSERT INTO sessions (session_id, user_id, created_at, expires_at, source_ip, user_agent) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind::<Text, _>(&session.session_id)
            .bind::<Text, _>(&session.user_id)
            .bind::<Text, _>(session.created_at.to_rfc3339())
            .bind::<Text, _>(session.expires_at.to_rfc3339())
            .bind::<Text, _>(&session.source_ip)
            .bind::<Nullable<Text>, _>(&session.user_agent)
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(())
        })
    }

    pub async fn find(&self, session_id: &str) -> Result<Option<Session>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<SessionRow> = diesel::sql_query("SELECT * FROM sessions WHERE session_id = ?")
                .bind::<Text, _>(session_id)
                .load(&mut conn)
                .await
                .map_err(to_diesel_error)?;
            Ok(rows.into_iter().next().map(row_to_session))
        })
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query("DELETE FROM sessions WHERE session_id = ?")
                .bind::<Text, _>(session_id)
                .execute(&mut conn)
                .await
                .map_err(to_diesel_error)?;
            Ok(())
        })
    }

    /// Delete expired sessions, returning the number removed (spec §4.6
    /// "sessions.cleanup_interval_hours").
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query("DELETE FROM sessions WHERE expires_at <= ?")
                .bind::<Text, _>(now.to_rfc3339())
                .execute(&mut conn)
                .await
                .map_err(to_diesel_error)
        })
    }
}

fn row_to_session(row: SessionRow) -> Session {
    Session {
        session_id: row.session_id,
        user_id: row.user_id,
        created_at: parse_time(&row.created_at),
        expires_at: parse_time(&row.expires_at),
        source_ip: row.source_ip,
        user_agent: row.user_agent,
    }
}

/// Repository over the `objects` table (current metadata per key).
pub struct ObjectRepository<'a>(pub &'a DieselDbContext);

impl ObjectRepository<'_> {
    pub async fn upsert(&self, object: &StoredObject) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&object.metadata).map_err(|e| RepositoryError::Query(e.to_string()))?;
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query(
                "INSERT INTO objects (object_key, size, content_type, etag, version_id, storage_backend, storage_class, metadata, last_modified) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(object_key) DO UPDATE SET size=excluded.size, content_type=excluded.content_type, \
                 etag=excluded.etag, version_id=excluded.version_id, storage_backend=excluded.storage_backend, \
                 storage_class=excluded.storage_class, metadata=excluded.metadata, last_modified=excluded.last_modified",
            )
            .bind::<Text, _>(&object.object_key)
            .bind::<BigInt, _>(object.size as i64)
            .bind::<Text, _>(&object.content_type)
            .bind::<Text, _>(&object.etag)
            .bind::<Text, _>(&object.version_id)
            .bind::<Text, _>(&object.storage_backend)
            .bind::<Nullable<Text>, _>(&object.storage_class)
            .bind::<Text, _>(&metadata)
            .bind::<Text, _>(object.last_modified.to_rfc3339())
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(())
        })
    }

    pub async fn find(&self, object_key: &str) -> Result<Option<StoredObject>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<ObjectRow> = diesel::sql_query("SELECT * FROM objects WHERE object_key = ?")
                .bind::<Text, _>(object_key)
                .load(&mut conn)
                .await
                .map_err(to_diesel_error)?;
            Ok(rows.into_iter().next().map(row_to_object))
        })
    }

    pub async fn list_by_prefix(&self, prefix: &str, limit: i64, offset: i64) -> Result<Vec<StoredObject>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<ObjectRow> = diesel::sql_query(
                "SELECT * FROM objects WHERE object_key LIKE ? ORDER BY last_modified DESC LIMIT ? OFFSET ?",
            )
            .bind::<Text, _>(format!("{prefix}%"))
            .bind::<BigInt, _>(limit)
            .bind::<BigInt, _>(offset)
            .load(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(rows.into_iter().map(row_to_object).collect())
        })
    }

    /// Full-text-ish search over key/content_type (weight A) and metadata
    /// values (weight B), per spec §4.5. The `LIKE` scan picks the
    /// candidate rows, since the bundled SQLite build has no FTS5
    /// extension, but ranking is weighted in Rust rather than left at
    /// recency: a key/content_type hit outranks a metadata-only hit, and
    /// rows matching on both outrank either alone. Recency still breaks
    /// ties between equally-weighted rows.
    pub async fn search(&self, text: &str, limit: i64) -> Result<Vec<StoredObject>, RepositoryError> {
        const WEIGHT_A: u32 = 2;
        const WEIGHT_B: u32 = 1;
        let pattern = format!("%{text}%");
        let needle = text.to_ascii_lowercase();
        // Over-fetch so the weighted reorder has more than the final page
        // to rank over; recency-LIMIT alone would have thrown the rest away.
        let candidate_limit = limit.saturating_mul(4).max(limit);
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<ObjectRow> = diesel::sql_query(
                "SELECT * FROM objects WHERE object_key LIKE ? OR content_type LIKE ? OR metadata LIKE ? \
                 ORDER BY last_modified DESC LIMIT ?",
            )
            .bind::<Text, _>(&pattern)
            .bind::<Text, _>(&pattern)
            .bind::<Text, _>(&pattern)
            .bind::<BigInt, _>(candidate_limit)
            .load(&mut conn)
            .await
            .map_err(to_diesel_error)?;

            let mut scored: Vec<(u32, StoredObject)> = rows
                .into_iter()
                .map(row_to_object)
                .map(|obj| {
                    let mut weight = 0;
                    if obj.object_key.to_ascii_lowercase().contains(&needle)
                        || obj.content_type.to_ascii_lowercase().contains(&needle)
                    {
                        weight += WEIGHT_A;
                    }
                    if obj.metadata.values().any(|v| v.to_ascii_lowercase().contains(&needle)) {
                        weight += WEIGHT_B;
                    }
                    (weight, obj)
                })
                .collect();
            // Stable sort: rows arrived in `last_modified DESC` order, so
            // equal-weight rows keep that recency tiebreak (spec §4.5).
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            Ok(scored.into_iter().take(limit.max(0) as usize).map(|(_, obj)| obj).collect())
        })
    }

    pub async fn delete(&self, object_key: &str) -> Result<(), RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query("DELETE FROM objects WHERE object_key = ?")
                .bind::<Text, _>(object_key)
                .execute(&mut conn)
                .await
                .map_err(to_diesel_error)?;
            Ok(())
        })
    }
}

fn row_to_object(row: ObjectRow) -> StoredObject {
    StoredObject {
        object_key: row.object_key,
        size: row.size.max(0) as u64,
        content_type: row.content_type,
        etag: row.etag,
        version_id: row.version_id,
        storage_backend: row.storage_backend,
        storage_class: row.storage_class,
        metadata: serde_json::from_str(&row.metadata).unwrap_or_default(),
        last_modified: parse_time(&row.last_modified),
    }
}

/// Repository over the `versions` table.
pub struct VersionRepository<'a>(pub &'a DieselDbContext);

impl VersionRepository<'_> {
    pub async fn insert(&self, version: &Version) -> Result<(), RepositoryError> {
        let tags = serde_json::to_string(&version.tags).map_err(|e| RepositoryError::Query(e.to_string()))?;
        with_conn!(self.0.pool(), |conn| {
            if version.is_latest {
                diesel::sql_query("UPDATE versions SET is_latest = 0 WHERE object_key = ?")
                    .bind::<Text, _>(&version.object_key)
                    .execute(&mut conn)
                    .await
                    .map_err(to_diesel_error)?;
            }
            diesel::sql_query(
                "INSERT INTO versions (object_key, version_id, size, etag, is_latest, created_by, comment, tags, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind::<Text, _>(&version.object_key)
            .bind::<Text, _>(&version.version_id)
            .bind::<BigInt, _>(version.size as i64)
            .bind::<Text, _>(&version.etag)
            .bind::<Bool, _>(version.is_latest)
            .bind::<Nullable<Text>, _>(&version.created_by)
            .bind::<Nullable<Text>, _>(&version.comment)
            .bind::<Text, _>(&tags)
            .bind::<Text, _>(version.created_at.to_rfc3339())
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(())
        })
    }

    pub async fn list_for_key(&self, object_key: &str) -> Result<Vec<Version>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<VersionRow> = diesel::sql_query(
                "SELECT * FROM versions WHERE object_key = ? ORDER BY created_at DESC",
            )
            .bind::<Text, _>(object_key)
            .load(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(rows.into_iter().map(row_to_version).collect())
        })
    }
}

fn row_to_version(row: VersionRow) -> Version {
    Version {
        object_key: row.object_key,
        version_id: row.version_id,
        size: row.size.max(0) as u64,
        etag: row.etag,
        is_latest: row.is_latest,
        created_by: row.created_by,
        comment: row.comment,
        tags: serde_json::from_str(&row.tags).unwrap_or_default(),
        created_at: parse_time(&row.created_at),
    }
}

/// Repository over the `audit_events` table (spec §4.6).
pub struct AuditRepository<'a>(pub &'a DieselDbContext);

impl AuditRepository<'_> {
    pub async fn insert(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let action = serde_json::to_value(event.action)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let metadata = serde_json::to_string(&event.metadata).map_err(|e| RepositoryError::Query(e.to_string()))?;
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query(
                "INSERT INTO audit_events (timestamp, user_id, username, action, resource_type, resource_id, allowed, ip_address, session_id, user_agent, metadata) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind::<Text, _>(event.timestamp.to_rfc3339())
            .bind::<Nullable<Text>, _>(&event.user_id)
            .bind::<Nullable<Text>, _>(&event.username)
            .bind::<Text, _>(&action)
            .bind::<Text, _>(&event.resource_type)
            .bind::<Text, _>(&event.resource_id)
            .bind::<Bool, _>(event.allowed)
            .bind::<Text, _>(&event.ip_address)
            .bind::<Nullable<Text>, _>(&event.session_id)
            .bind::<Nullable<Text>, _>(&event.user_agent)
            .bind::<Text, _>(&metadata)
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(())
        })
    }

    /// Cleanup events older than `retention_days`, but never delete the
    /// most recent event per user (spec §4.6).
    pub async fn cleanup(&self, retention_days: i64) -> Result<usize, RepositoryError> {
        let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query(
                "DELETE FROM audit_events WHERE timestamp < ? AND id NOT IN ( \
                   SELECT MAX(id) FROM audit_events WHERE user_id IS NOT NULL GROUP BY user_id \
                 )",
            )
            .bind::<Text, _>(cutoff)
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)
        })
    }

    pub async fn for_user(&self, user_id: &str, limit: i64) -> Result<Vec<AuditEvent>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<AuditRow> = diesel::sql_query(
                "SELECT * FROM audit_events WHERE user_id = ? ORDER BY timestamp DESC LIMIT ?",
            )
            .bind::<Text, _>(user_id)
            .bind::<BigInt, _>(limit)
            .load(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(rows.into_iter().map(row_to_audit).collect())
        })
    }
}

fn row_to_audit(row: AuditRow) -> AuditEvent {
    AuditEvent {
        timestamp: parse_time(&row.timestamp),
        user_id: row.user_id,
        username: row.username,
        action: serde_json::from_value(serde_json::Value::String(row.action)).unwrap_or(AuditAction::View),
        resource_type: row.resource_type,
        resource_id: row.resource_id,
        allowed: row.allowed,
        ip_address: row.ip_address,
        session_id: row.session_id,
        user_agent: row.user_agent,
        metadata: serde_json::from_str(&row.metadata).unwrap_or_default(),
    }
}

/// Repository over `hook_registrations` and `hook_executions`.
pub struct HookRepository<'a>(pub &'a DieselDbContext);

impl HookRepository<'_> {
    pub async fn register(&self, hook: &HookRegistration) -> Result<(), RepositoryError> {
        let hook_type = serde_json::to_value(&hook.hook_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let headers = serde_json::to_string(&hook.headers).map_err(|e| RepositoryError::Query(e.to_string()))?;
        let event_filter = serde_json::to_string(&hook.event_filter).map_err(|e| RepositoryError::Query(e.to_string()))?;
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query(
                "INSERT INTO hook_registrations (name, hook_type, target, method, headers, event_filter, retry_count, timeout_secs) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(name) DO UPDATE SET hook_type=excluded.hook_type, target=excluded.target, \
                 method=excluded.method, headers=excluded.headers, event_filter=excluded.event_filter, \
                 retry_count=excluded.retry_count, timeout_secs=excluded.timeout_secs",
            )
            .bind::<Text, _>(&hook.name)
            .bind::<Text, _>(&hook_type)
            .bind::<Text, _>(&hook.target)
            .bind::<Nullable<Text>, _>(&hook.method)
            .bind::<Text, _>(&headers)
            .bind::<Text, _>(&event_filter)
            .bind::<Integer, _>(hook.retry_count as i32)
            .bind::<Integer, _>(hook.timeout_secs as i32)
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(())
        })
    }

    pub async fn list(&self) -> Result<Vec<HookRegistration>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<HookRegistrationRow> = diesel::sql_query("SELECT * FROM hook_registrations")
                .load(&mut conn)
                .await
                .map_err(to_diesel_error)?;
            Ok(rows.into_iter().map(row_to_hook).collect())
        })
    }

    pub async fn record_execution(&self, execution: &HookExecution) -> Result<(), RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query(
                "INSERT INTO hook_executions (hook_name, event, object_key, success, execution_time_ms, response_or_error, timestamp) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind::<Text, _>(&execution.hook_name)
            .bind::<Text, _>(&execution.event)
            .bind::<Nullable<Text>, _>(&execution.object_key)
            .bind::<Bool, _>(execution.success)
            .bind::<BigInt, _>(execution.execution_time_ms as i64)
            .bind::<Nullable<Text>, _>(&execution.response_or_error)
            .bind::<Text, _>(execution.timestamp.to_rfc3339())
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(())
        })
    }

    pub async fn executions_for(&self, hook_name: &str, limit: i64) -> Result<Vec<HookExecution>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<HookExecutionRow> = diesel::sql_query(
                "SELECT * FROM hook_executions WHERE hook_name = ? ORDER BY timestamp DESC LIMIT ?",
            )
            .bind::<Text, _>(hook_name)
            .bind::<BigInt, _>(limit)
            .load(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(rows.into_iter().map(row_to_execution).collect())
        })
    }
}

fn row_to_hook(row: HookRegistrationRow) -> HookRegistration {
    HookRegistration {
        name: row.name,
        hook_type: serde_json::from_value(serde_json::Value::String(row.hook_type)).unwrap_or(HookType::FileLog),
        target: row.target,
        method: row.method,
        headers: serde_json::from_str(&row.headers).unwrap_or_default(),
        event_filter: serde_json::from_str(&row.event_filter).unwrap_or_default(),
        retry_count: row.retry_count.max(0) as u32,
        timeout_secs: row.timeout_secs.max(0) as u64,
    }
}

/// Repository over `configuration_history`: a ledger of applied config
/// snapshots, deduplicated by content hash.
pub struct ConfigHistoryRepository<'a>(pub &'a DieselDbContext);

/// One stored configuration snapshot.
#[derive(Debug, Clone)]
pub struct ConfigHistoryEntry {
    pub uuid: String,
    pub created_at: DateTime<Utc>,
    pub data: String,
    pub format: String,
    pub hash: String,
}

impl ConfigHistoryRepository<'_> {
    pub async fn hash_exists(&self, hash: &str) -> Result<bool, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            #[derive(diesel::QueryableByName)]
            struct Count {
                #[diesel(sql_type = BigInt)]
                count: i64,
            }
            let rows: Vec<Count> = diesel::sql_query("SELECT COUNT(*) as count FROM configuration_history WHERE hash = ?")
                .bind::<Text, _>(hash)
                .load(&mut conn)
                .await
                .map_err(to_diesel_error)?;
            Ok(rows.first().map(|r| r.count > 0).unwrap_or(false))
        })
    }

    /// Insert a new snapshot if its hash isn't already the most recent;
    /// returns `false` (no-op) when the content is unchanged.
    pub async fn insert_if_new(&self, data: &str, format: &str, hash: &str) -> Result<bool, RepositoryError> {
        if self.hash_exists(hash).await? {
            return Ok(false);
        }
        let uuid = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        with_conn!(self.0.pool(), |conn| {
            diesel::sql_query(
                "INSERT INTO configuration_history (uuid, created_at, data, format, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind::<Text, _>(&uuid)
            .bind::<Text, _>(&now)
            .bind::<Text, _>(data)
            .bind::<Text, _>(format)
            .bind::<Text, _>(hash)
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            diesel::sql_query(
                "DELETE FROM configuration_history WHERE uuid NOT IN ( \
                   SELECT uuid FROM configuration_history ORDER BY created_at DESC LIMIT ? \
                 )",
            )
            .bind::<BigInt, _>(MAX_CONFIG_HISTORY_ENTRIES)
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(())
        })?;
        Ok(true)
    }

    pub async fn get_latest(&self) -> Result<Option<ConfigHistoryEntry>, RepositoryError> {
        with_conn!(self.0.pool(), |conn| {
            let rows: Vec<ConfigHistoryRow> = diesel::sql_query(
                "SELECT * FROM configuration_history ORDER BY created_at DESC LIMIT 1",
            )
            .load(&mut conn)
            .await
            .map_err(to_diesel_error)?;
            Ok(rows.into_iter().next().map(row_to_config_history))
        })
    }
}

fn row_to_config_history(row: ConfigHistoryRow) -> ConfigHistoryEntry {
    ConfigHistoryEntry {
        uuid: row.uuid,
        created_at: parse_time(&row.created_at),
        data: row.data,
        format: row.format,
        hash: row.hash,
    }
}

fn row_to_execution(row: HookExecutionRow) -> HookExecution {
    HookExecution {
        hook_name: row.hook_name,
        event: row.event,
        object_key: row.object_key,
        success: row.success,
        execution_time_ms: row.execution_time_ms.max(0) as u64,
        response_or_error: row.response_or_error,
        timestamp: parse_time(&row.timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::pool::DbPool;

    async fn insert_object(ctx: &DieselDbContext, key: &str, content_type: &str, metadata_json: &str, last_modified: &str) {
        with_conn!(ctx.pool(), |conn| {
            diesel::sql_query(
                "INSERT INTO objects (object_key, size, content_type, etag, version_id, storage_backend, \
                 storage_class, metadata, last_modified) VALUES (?, 0, ?, 'etag', 'v1', 'local', NULL, ?, ?)",
            )
            .bind::<Text, _>(key)
            .bind::<Text, _>(content_type)
            .bind::<Text, _>(metadata_json)
            .bind::<Text, _>(last_modified)
            .execute(&mut conn)
            .await
            .map_err(to_diesel_error)
        })
        .unwrap();
    }

    #[tokio::test]
    async fn search_ranks_key_match_above_metadata_only_match() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("metadata.db");
        let pool = DbPool::connect(db_path.to_str().unwrap(), 4).await.unwrap();
        let ctx = DieselDbContext::new(pool);
        ctx.init_schema().await.unwrap();

        // Matches only in `metadata`, newer timestamp.
        insert_object(&ctx, "other/unrelated.bin", "application/octet-stream", r#"{"note":"invoice scan"}"#, "2024-06-02T00:00:00Z").await;
        // Matches in `object_key`, older timestamp.
        insert_object(&ctx, "acme/2024/invoice/B1/p1.png", "image/png", "{}", "2024-06-01T00:00:00Z").await;

        let repo = ObjectRepository(&ctx);
        let hits = repo.search("invoice", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].object_key, "acme/2024/invoice/B1/p1.png");
        assert_eq!(hits[1].object_key, "other/unrelated.bin");
    }
}
