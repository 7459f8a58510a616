//! Inline schema definitions, mirroring the teacher's `init_schema`
//! batch-execute pattern rather than embedded migration files.

pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    department TEXT NOT NULL DEFAULT '',
    clearance_level INTEGER NOT NULL DEFAULT 0,
    roles TEXT NOT NULL DEFAULT '[]',
    email TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    attributes TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    source_ip TEXT NOT NULL,
    user_agent TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);

CREATE TABLE IF NOT EXISTS objects (
    object_key TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    etag TEXT NOT NULL,
    version_id TEXT NOT NULL,
    storage_backend TEXT NOT NULL,
    storage_class TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    last_modified TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_objects_last_modified ON objects(last_modified DESC);

CREATE TABLE IF NOT EXISTS versions (
    object_key TEXT NOT NULL,
    version_id TEXT NOT NULL,
    size INTEGER NOT NULL,
    etag TEXT NOT NULL,
    is_latest INTEGER NOT NULL,
    created_by TEXT,
    comment TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    PRIMARY KEY (object_key, version_id)
);
CREATE INDEX IF NOT EXISTS idx_versions_object_key ON versions(object_key);

CREATE TABLE IF NOT EXISTS audit_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    user_id TEXT,
    username TEXT,
    action TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    allowed INTEGER NOT NULL,
    ip_address TEXT NOT NULL,
    session_id TEXT,
    user_agent TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_events(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_user_id ON audit_events(user_id);

CREATE TABLE IF NOT EXISTS hook_registrations (
    name TEXT PRIMARY KEY,
    hook_type TEXT NOT NULL,
    target TEXT NOT NULL,
    method TEXT,
    headers TEXT NOT NULL DEFAULT '[]',
    event_filter TEXT NOT NULL DEFAULT '[]',
    retry_count INTEGER NOT NULL DEFAULT 3,
    timeout_secs INTEGER NOT NULL DEFAULT 10
);

CREATE TABLE IF NOT EXISTS hook_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hook_name TEXT NOT NULL,
    event TEXT NOT NULL,
    object_key TEXT,
    success INTEGER NOT NULL,
    execution_time_ms INTEGER NOT NULL,
    response_or_error TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_hook_executions_hook_name ON hook_executions(hook_name);

CREATE TABLE IF NOT EXISTS configuration_history (
    uuid TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL,
    format TEXT NOT NULL,
    hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_config_history_created_at ON configuration_history(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_config_history_hash ON configuration_history(hash);
"#;

#[cfg(feature = "postgres")]
pub const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    department TEXT NOT NULL DEFAULT '',
    clearance_level SMALLINT NOT NULL DEFAULT 0,
    roles TEXT NOT NULL DEFAULT '[]',
    email TEXT,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    attributes TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    source_ip TEXT NOT NULL,
    user_agent TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);

CREATE TABLE IF NOT EXISTS objects (
    object_key TEXT PRIMARY KEY,
    size BIGINT NOT NULL,
    content_type TEXT NOT NULL,
    etag TEXT NOT NULL,
    version_id TEXT NOT NULL,
    storage_backend TEXT NOT NULL,
    storage_class TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    last_modified TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_objects_last_modified ON objects(last_modified DESC);

CREATE TABLE IF NOT EXISTS versions (
    object_key TEXT NOT NULL,
    version_id TEXT NOT NULL,
    size BIGINT NOT NULL,
    etag TEXT NOT NULL,
    is_latest BOOLEAN NOT NULL,
    created_by TEXT,
    comment TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (object_key, version_id)
);
CREATE INDEX IF NOT EXISTS idx_versions_object_key ON versions(object_key);

CREATE TABLE IF NOT EXISTS audit_events (
    id BIGSERIAL PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL,
    user_id TEXT,
    username TEXT,
    action TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    allowed BOOLEAN NOT NULL,
    ip_address TEXT NOT NULL,
    session_id TEXT,
    user_agent TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_events(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_user_id ON audit_events(user_id);

CREATE TABLE IF NOT EXISTS hook_registrations (
    name TEXT PRIMARY KEY,
    hook_type TEXT NOT NULL,
    target TEXT NOT NULL,
    method TEXT,
    headers TEXT NOT NULL DEFAULT '[]',
    event_filter TEXT NOT NULL DEFAULT '[]',
    retry_count INTEGER NOT NULL DEFAULT 3,
    timeout_secs INTEGER NOT NULL DEFAULT 10
);

CREATE TABLE IF NOT EXISTS hook_executions (
    id BIGSERIAL PRIMARY KEY,
    hook_name TEXT NOT NULL,
    event TEXT NOT NULL,
    object_key TEXT,
    success BOOLEAN NOT NULL,
    execution_time_ms BIGINT NOT NULL,
    response_or_error TEXT,
    timestamp TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_hook_executions_hook_name ON hook_executions(hook_name);

CREATE TABLE IF NOT EXISTS configuration_history (
    uuid TEXT PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    data TEXT NOT NULL,
    format TEXT NOT NULL,
    hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_config_history_created_at ON configuration_history(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_config_history_hash ON configuration_history(hash);
"#;
