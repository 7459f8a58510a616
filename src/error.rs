//! Crate-wide error taxonomy (see spec §7).
//!
//! Component errors (`RepositoryError`, `StorageError`, `RoutingError`,
//! `QcError`, `HookError`) are distinct `thiserror` enums that convert into
//! `AppError` at the HTTP boundary. `AppError` itself carries no HTTP
//! framework types so it stays usable from CLI and library code alike.

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Top-level error kind, mirroring the taxonomy in spec §7.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication required")]
    Authentication,

    #[error("access denied: {0}")]
    Authorisation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Symbolic error code included in every HTTP error response.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Authentication => "authentication_required",
            AppError::Authorisation(_) => "access_denied",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::RateLimit { .. } => "rate_limited",
            AppError::BackendUnavailable(_) => "backend_unavailable",
            AppError::Integrity(_) => "integrity_violation",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status code for this error, per spec §6/§7.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Authentication => 401,
            AppError::Authorisation(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::RateLimit { .. } => 429,
            AppError::BackendUnavailable(_) => 503,
            AppError::Integrity(_) => 500,
            AppError::Internal(_) => 500,
        }
    }

    /// Message safe to return to a client: never reveals whether a user
    /// exists, which ABAC rule denied access, or internal paths.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Authentication => "invalid or expired session".to_string(),
            AppError::Authorisation(_) => "access denied".to_string(),
            AppError::Integrity(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors from the metadata DB repository layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection failed: {0}")]
    Connection(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("row not found")]
    NotFound,
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => AppError::NotFound("resource not found".into()),
            RepositoryError::Connection(msg) => AppError::BackendUnavailable(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Errors from the storage abstraction (§4.5).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("etag mismatch for {key}: expected {expected}, found {found}")]
    EtagMismatch {
        key: String,
        expected: String,
        found: String,
    },
    #[error("integrity error: {0}")]
    Integrity(String),
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(k) => AppError::NotFound(format!("object {k} not found")),
            StorageError::BackendUnavailable(msg) => AppError::BackendUnavailable(msg),
            StorageError::Integrity(msg) => AppError::Integrity(msg),
            StorageError::EtagMismatch { .. } => AppError::Integrity(e.to_string()),
            StorageError::Io(msg) => AppError::Internal(msg),
        }
    }
}

/// Errors from the routing engine (§4.1). The engine never fails loud; this
/// exists for completeness and for internal unit testing only.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("incomplete routing input")]
    IncompleteInput,
}

/// Errors from the QC task queue (§4.2).
#[derive(Debug, Error)]
pub enum QcError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("lock conflict: task is held by another operator")]
    LockConflict,
    #[error("task is already in a terminal state")]
    AlreadyTerminal,
    #[error("durable log append failed: {0}")]
    LogAppend(String),
}

impl From<QcError> for AppError {
    fn from(e: QcError) -> Self {
        match e {
            QcError::NotFound(id) => AppError::NotFound(format!("task {id} not found")),
            QcError::LockConflict => AppError::Conflict("lock_conflict".into()),
            QcError::AlreadyTerminal => AppError::Conflict("already_terminal".into()),
            QcError::LogAppend(msg) => AppError::Internal(msg),
        }
    }
}

/// Errors from the integration hook dispatcher (§4.7).
#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook {0} not registered")]
    NotRegistered(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("queue full")]
    QueueFull,
}

/// Errors from the archive organiser (§4.3) and batch merger (§4.4).
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("page not found: {0}")]
    PageNotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("batch {0} is not ready: {1} page(s) still pending qc")]
    BatchNotReady(String, usize),
    #[error("batch {0} must be sealed before it can be merged")]
    BatchNotSealed(String),
    #[error("batch {0} no longer accepts new pages: it is already sealed or merged")]
    BatchNotOpen(String),
    #[error("batch {0} is already merged")]
    BatchAlreadyMerged(String),
    #[error("merge failed: {0}")]
    Merge(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<ArchiveError> for AppError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::PageNotFound(id) => AppError::NotFound(format!("page {id} not found")),
            ArchiveError::BatchNotReady(id, pending) => {
                AppError::Conflict(format!("batch {id} not ready: {pending} page(s) pending qc"))
            }
            ArchiveError::BatchNotSealed(id) => AppError::Conflict(format!("batch {id} is not sealed")),
            ArchiveError::BatchNotOpen(id) => AppError::Conflict(format!("batch {id} is not open")),
            ArchiveError::BatchAlreadyMerged(id) => AppError::Conflict(format!("batch {id} already merged")),
            ArchiveError::Storage(e) => e.into(),
            ArchiveError::Merge(msg) | ArchiveError::Io(msg) => AppError::Internal(msg),
        }
    }
}
