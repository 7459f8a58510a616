//! Configuration management (spec §6 "Configuration (closed option set)"),
//! built on the `prefer`/`prefer_db` layering: environment variables, an
//! optional TOML file, and a DB-stored configuration history for
//! after-the-fact auditing of what was actually running.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::repository::{ConfigHistoryRepository, DieselDbContext};

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_session_duration_hours() -> u64 {
    24
}
fn default_session_cleanup_hours() -> u64 {
    1
}
fn default_login_rate_limit() -> String {
    "5/minute".to_string()
}
fn default_global_rate_limit() -> String {
    "200/day".to_string()
}
fn default_storage_backend() -> StorageBackendKind {
    StorageBackendKind::Local
}
fn default_max_versions() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_queue_size() -> usize {
    1024
}
fn default_hook_workers() -> usize {
    8
}
fn default_retention_days() -> i64 {
    365
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, prefer::FromValue)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    #[prefer(default = "0.0.0.0")]
    pub host: String,
    #[serde(default = "default_port")]
    #[prefer(default = "8080")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct SessionsConfig {
    #[serde(default = "default_session_duration_hours")]
    #[prefer(default = "24")]
    pub duration_hours: u64,
    #[serde(default = "default_session_cleanup_hours")]
    #[prefer(default = "1")]
    pub cleanup_interval_hours: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            duration_hours: default_session_duration_hours(),
            cleanup_interval_hours: default_session_cleanup_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct RateLimitConfig {
    #[serde(default = "default_login_rate_limit")]
    #[prefer(default = "5/minute")]
    pub login: String,
    #[serde(default = "default_global_rate_limit")]
    #[prefer(default = "200/day")]
    pub global: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: default_login_rate_limit(),
            global: default_global_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    #[prefer(default)]
    pub backend: StorageBackendKind,
    /// Local backend: base directory. S3 backend: ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// S3 backend: bucket name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// S3 backend: custom endpoint, for MinIO/S3-compatible services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default = "default_true")]
    #[prefer(default = "true")]
    pub versioning_enabled: bool,
    #[serde(default = "default_max_versions")]
    #[prefer(default = "10")]
    pub max_versions_per_object: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
            bucket: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            versioning_enabled: true,
            max_versions_per_object: default_max_versions(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct DbConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_db_min_connections")]
    #[prefer(default = "1")]
    pub min_connections: u32,
    #[serde(default = "default_db_max_connections")]
    #[prefer(default = "10")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct HooksConfig {
    #[serde(rename = "async", default = "default_true")]
    #[prefer(default = "true")]
    pub async_dispatch: bool,
    #[serde(default = "default_queue_size")]
    #[prefer(default = "1024")]
    pub queue_size: usize,
    #[serde(default = "default_hook_workers")]
    #[prefer(default = "8")]
    pub workers: usize,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            async_dispatch: true,
            queue_size: default_queue_size(),
            workers: default_hook_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct AuditConfig {
    #[serde(default = "default_retention_days")]
    #[prefer(default = "365")]
    pub retention_days: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// Closed configuration option set (spec §6), as loaded from file/env.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    #[serde(default)]
    #[prefer(default)]
    pub server: ServerConfig,
    #[serde(default)]
    #[prefer(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    #[prefer(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    #[prefer(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    #[prefer(default)]
    pub db: DbConfig,
    #[serde(default)]
    #[prefer(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    #[prefer(default)]
    pub audit: AuditConfig,
    /// Base data directory; not part of the closed HTTP-facing option set
    /// but needed to resolve every on-disk path under it (spec §6
    /// "Persisted state layout").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover and load configuration the way the CLI entry point does:
    /// `prefer`'s standard-location file discovery, falling back to
    /// environment-only defaults when no file is found.
    pub async fn load() -> Self {
        match prefer::load("foiacquire").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_default(),
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load from an explicit TOML file.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("failed to read config file: {e}"))?;
        let mut config: Config = toml::from_str(&contents).map_err(|e| format!("failed to parse TOML config: {e}"))?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load the most recently persisted snapshot from `configuration_history`,
    /// if any. Used to detect configuration drift between what is on disk
    /// and what the archive was last known to be running with.
    pub async fn load_from_db(db: &DieselDbContext) -> Option<Self> {
        let entry = ConfigHistoryRepository(db).get_latest().await.ok().flatten()?;
        toml::from_str(&entry.data).ok()
    }

    /// Persist this configuration to `configuration_history` if its content
    /// differs from the most recently stored snapshot.
    pub async fn record_to_db(&self, db: &DieselDbContext) -> Result<bool, String> {
        let data = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        let hash = {
            let mut hasher = Sha256::new();
            hasher.update(data.as_bytes());
            hex::encode(hasher.finalize())
        };
        ConfigHistoryRepository(db)
            .insert_if_new(&data, "toml", &hash)
            .await
            .map_err(|e| e.to_string())
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("foiacquire"))
    }
}

/// Resolved, ready-to-use runtime settings derived from `Config` plus
/// environment overrides (`DATABASE_URL` takes precedence over `db.*`,
/// matching the existing CLI's `DATABASE_URL` handling).
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub session_duration_hours: u64,
    pub session_cleanup_interval_hours: u64,
    pub login_rate_limit: String,
    pub global_rate_limit: String,
    pub storage: StorageConfig,
    pub hooks_async: bool,
    pub hooks_queue_size: usize,
    pub hooks_workers: usize,
    pub audit_retention_days: i64,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        let data_dir = config.resolved_data_dir();
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}", data_dir.join("users.db").display())
        });
        Self {
            server_host: config.server.host.clone(),
            server_port: config.server.port,
            database_url,
            session_duration_hours: config.sessions.duration_hours,
            session_cleanup_interval_hours: config.sessions.cleanup_interval_hours,
            login_rate_limit: config.rate_limit.login.clone(),
            global_rate_limit: config.rate_limit.global.clone(),
            storage: config.storage.clone(),
            hooks_async: config.hooks.async_dispatch,
            hooks_queue_size: config.hooks.queue_size,
            hooks_workers: config.hooks.workers,
            audit_retention_days: config.audit.retention_days,
            data_dir,
        }
    }

    pub fn encryption_key_path(&self) -> PathBuf {
        self.data_dir.join(".encryption_key")
    }

    pub fn archive_root(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn local_storage_root(&self) -> PathBuf {
        self.data_dir.join("storage")
    }

    pub fn qc_log_path(&self) -> PathBuf {
        self.data_dir.join("qc_queue.jsonl")
    }

    pub fn feedback_dir(&self) -> PathBuf {
        self.data_dir.join("feedback")
    }

    pub fn audit_db_url(&self) -> String {
        format!("sqlite://{}", self.data_dir.join("audit_log.db").display())
    }

    /// Load `Config` + `Settings` together: env/file first, with a later
    /// reconciliation against the DB-stored history left to the caller
    /// (`Config::load_from_db`/`record_to_db`) once a `DieselDbContext`
    /// exists.
    pub async fn load() -> (Settings, Config) {
        let config = Config::load().await;
        let settings = Settings::from_config(&config);
        (settings, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_closed_option_set() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.sessions.duration_hours, 24);
        assert_eq!(config.rate_limit.login, "5/minute");
        assert_eq!(config.storage.max_versions_per_object, 10);
        assert_eq!(config.audit.retention_days, 365);
        assert!(config.hooks.async_dispatch);
    }

    #[test]
    fn settings_derive_database_url_under_data_dir_when_unset() {
        std::env::remove_var("DATABASE_URL");
        let mut config = Config::default();
        config.data_dir = Some("/tmp/foiacquire-test-data".to_string());
        let settings = Settings::from_config(&config);
        assert!(settings.database_url.contains("foiacquire-test-data"));
        assert!(settings.database_url.starts_with("sqlite://"));
    }

    #[tokio::test]
    async fn load_from_path_parses_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foiacquire.toml");
        tokio::fs::write(&path, "[server]\nport = 9090\n").await.unwrap();
        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.server.port, 9090);
    }
}
