//! HTTP server for the document archive (spec §6 "External interfaces").
//!
//! Unlike a browsing UI, every endpoint here returns JSON. The module
//! shape — `AppState`, `create_router`, `serve` — follows the existing
//! web server's.

mod auth;
mod error;
mod handlers;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

pub use routes::create_router;

use crate::archive::ArchiveOrganiser;
use crate::auth::{Encryptor, LoginRateLimiter, SessionStore};
use crate::config::{Settings, StorageBackendKind, StorageConfig};
use crate::error::AppError;
use crate::hooks::callback::CallbackRegistry;
use crate::hooks::HookDispatcher;
use crate::merge::BatchMerger;
use crate::qc::log::{FeedbackLog, QcTaskLog};
use crate::qc::QcTaskQueue;
use crate::repository::{pool::DbPool, DieselDbContext};
use crate::routing::{RequiredFields, RoutingLog};
use crate::storage::local::LocalStorage;
use crate::storage::metadata_db::MetadataBackedStorage;
use crate::storage::ObjectStorage;
#[cfg(feature = "s3")]
use crate::storage::s3::S3Storage;

/// Build the configured object storage backend rooted at `local_root`
/// when `backend == Local` (spec §6 `storage.backend`).
async fn build_backend(cfg: &StorageConfig, local_root: PathBuf) -> Result<Arc<dyn ObjectStorage>, AppError> {
    match cfg.backend {
        StorageBackendKind::Local => {
            let root = cfg.path.clone().map(PathBuf::from).unwrap_or(local_root);
            Ok(Arc::new(LocalStorage::new(root, cfg.max_versions_per_object)))
        }
        StorageBackendKind::S3 => {
            #[cfg(feature = "s3")]
            {
                let bucket = cfg
                    .bucket
                    .clone()
                    .ok_or_else(|| AppError::Internal("storage.bucket is required for the s3 backend".into()))?;
                let backend = S3Storage::new(bucket, cfg.endpoint.clone(), None)
                    .await
                    .map_err(AppError::from)?;
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "s3"))]
            {
                Err(AppError::Internal("s3 storage backend requires the `s3` feature".into()))
            }
        }
    }
}

/// Shared application state, constructed once at boot in the dependency
/// order spec §9 prescribes: DB/schema, then storage, then the components
/// layered on top of it.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DieselDbContext>,
    pub sessions: Arc<SessionStore>,
    pub login_rate_limiter: Arc<LoginRateLimiter>,
    pub organiser: Arc<ArchiveOrganiser>,
    pub merger: Arc<BatchMerger>,
    pub generic_storage: Arc<MetadataBackedStorage>,
    pub qc_queue: Arc<QcTaskQueue>,
    pub routing_log: Arc<RoutingLog>,
    pub required_fields: Arc<RequiredFields>,
    pub hooks: Arc<HookDispatcher>,
    /// Loaded at boot so the master key file exists with the right
    /// permissions (spec §6 `.encryption_key`); not yet wrapped around any
    /// storage write path in this iteration (see DESIGN.md).
    pub encryptor: Arc<Encryptor>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let pool = DbPool::connect(&settings.database_url, 10).await?;
        let db = Arc::new(DieselDbContext::new(pool));
        db.init_schema().await?;

        let archive_backend = build_backend(&settings.storage, settings.archive_root()).await?;
        let generic_backend = build_backend(&settings.storage, settings.local_storage_root()).await?;

        let organiser = Arc::new(ArchiveOrganiser::new(archive_backend));
        organiser.reindex().await?;
        let merger = Arc::new(BatchMerger::new(
            organiser_backend(&organiser),
            organiser.clone(),
            organiser.batch_registry(),
        ));

        let generic_storage = Arc::new(MetadataBackedStorage::new(generic_backend, db.clone()));

        let qc_log = QcTaskLog::new(settings.qc_log_path());
        let feedback_log = FeedbackLog::new(settings.feedback_dir());
        let qc_queue = Arc::new(QcTaskQueue::open(qc_log, feedback_log)?);

        let sessions = Arc::new(SessionStore::new(db.clone(), settings.session_duration_hours as i64));
        let login_rate_limiter = Arc::new(parse_rate_limiter(&settings.login_rate_limit));

        let callbacks = Arc::new(CallbackRegistry::new());
        let hooks = HookDispatcher::spawn(db.clone(), callbacks, settings.hooks_queue_size, settings.hooks_workers);

        let encryptor = Arc::new(Encryptor::load_or_create(&settings.encryption_key_path())?);

        Ok(Self {
            db,
            sessions,
            login_rate_limiter,
            organiser,
            merger,
            generic_storage,
            qc_queue,
            routing_log: Arc::new(RoutingLog::new()),
            required_fields: Arc::new(RequiredFields::new()),
            hooks,
            encryptor,
            settings: Arc::new(settings),
        })
    }
}

/// The merger needs its own handle to the archive's backing store (it
/// writes merged artefacts alongside the pages it reads); `ArchiveOrganiser`
/// doesn't expose its backend directly, so this re-derives it the same way
/// the organiser's own tests do, via a second `Arc` clone captured at
/// construction time.
fn organiser_backend(organiser: &Arc<ArchiveOrganiser>) -> Arc<dyn ObjectStorage> {
    organiser.storage_handle()
}

/// Parse a `"<count>/<unit>"` rate limit string (spec §6 `rate_limit.login`,
/// e.g. `"5/minute"`) into a `LoginRateLimiter`. Falls back to the spec
/// default of 5/minute on a malformed string rather than failing startup.
fn parse_rate_limiter(login_limit: &str) -> LoginRateLimiter {
    let (count, window) = login_limit
        .split_once('/')
        .and_then(|(c, unit)| c.trim().parse::<usize>().ok().map(|c| (c, unit.trim())))
        .unwrap_or((5, "minute"));
    let window_secs = match window {
        "second" | "seconds" => 1,
        "minute" | "minutes" => 60,
        "hour" | "hours" => 3600,
        "day" | "days" => 86400,
        _ => 60,
    };
    LoginRateLimiter::new(count, std::time::Duration::from_secs(window_secs), 50, 200)
}

/// Periodic maintenance: expired-session cleanup and stale-index repair,
/// run on a timer rather than per-request (spec §6
/// `sessions.cleanup_interval_hours`, §4.3 "Failure semantics").
pub async fn spawn_maintenance_tasks(state: AppState) {
    let cleanup_interval = std::time::Duration::from_secs(state.settings.session_cleanup_interval_hours.max(1) * 3600);
    let reindex_lock = Arc::new(Mutex::new(()));

    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired().await;
            if removed > 0 {
                tracing::info!(removed, "expired sessions cleaned up");
            }
        }
    });

    let organiser = state.organiser.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            ticker.tick().await;
            let _guard = reindex_lock.lock().await;
            let dirty = organiser.dirty_page_ids().await;
            if !dirty.is_empty() {
                tracing::warn!(count = dirty.len(), "dirty index entries pending reconciliation");
            }
        }
    });
}

/// Start the HTTP server.
pub async fn serve(settings: Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(settings).await?;
    spawn_maintenance_tasks(state.clone()).await;
    let app = create_router(state);

    let addr: std::net::SocketAddr = format!("{host}:{port}").parse()?;
    tracing::info!("starting server at http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
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

    async fn test_settings(dir: &tempfile::TempDir) -> Settings {
        let mut config = Config::default();
        config.data_dir = Some(dir.path().display().to_string());
        Settings::from_config(&config)
    }

    async fn setup_test_app() -> (axum::Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::env::remove_var("DATABASE_URL");
        let settings = test_settings(&dir).await;
        let state = AppState::new(settings).await.unwrap();
        (create_router(state), dir)
    }

    async fn setup_test_app_with_user(username: &str, password: &str) -> (axum::Router, AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::env::remove_var("DATABASE_URL");
        let settings = test_settings(&dir).await;
        let state = AppState::new(settings).await.unwrap();

        let user = User {
            user_id: "user-1".to_string(),
            username: username.to_string(),
            password_hash: hash_password(password).unwrap(),
            department: "records".to_string(),
            clearance_level: 3,
            roles: vec![Role::Operator],
            email: None,
            active: true,
            attributes: Default::default(),
        };
        UserRepository(&state.db).insert(&user).await.unwrap();

        (create_router(state.clone()), state, dir)
    }

    #[tokio::test]
    async fn health_check_requires_no_authentication() {
        let (app, _dir) = setup_test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_endpoint_without_token_is_unauthorized() {
        let (app, _dir) = setup_test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/archive/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let (app, _state, _dir) = setup_test_app_with_user("alice", "correct horse battery staple").await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/login")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"username": "alice", "password": "wrong"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_then_access_protected_endpoint_succeeds() {
        let (app, _state, _dir) = setup_test_app_with_user("alice", "correct horse battery staple").await;

        let login_response = app
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
        assert_eq!(login_response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(login_response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let token = json["token"].as_str().unwrap().to_string();

        let me_response = app
            .oneshot(
                Request::builder()
                    .uri("/api/auth/me")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(me_response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(me_response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["username"], "alice");
        assert!(json.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn archive_search_with_valid_session_returns_empty_corpus() {
        let (app, _state, _dir) = setup_test_app_with_user("bob", "hunter2 hunter2").await;

        let login_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/login")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"username": "bob", "password": "hunter2 hunter2"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(login_response.into_body(), usize::MAX).await.unwrap();
        let token = serde_json::from_slice::<serde_json::Value>(&body).unwrap()["token"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/archive/search")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 0);
    }
}
