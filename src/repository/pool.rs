//! Dual SQLite/PostgreSQL connection pool (spec §9 "SQLite thread
//! constraint": use a real connection pool and a client-server DB for
//! production workloads, rather than reopening a connection per request).

use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::AsyncConnection;

use crate::error::RepositoryError;

use super::util::{is_postgres_url, to_diesel_error, validate_database_url};

pub type SqliteAsyncConnection = SyncConnectionWrapper<diesel::sqlite::SqliteConnection>;
pub type SqlitePool = Pool<SqliteAsyncConnection>;

#[cfg(feature = "postgres")]
pub type PgPool = Pool<diesel_async::AsyncPgConnection>;

/// Backend-dispatching connection pool. SQLite is the default (single-file,
/// zero-ops); PostgreSQL is available behind the `postgres` feature for any
/// production workload that outgrows a single file (spec §9).
pub enum DbPool {
    Sqlite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl DbPool {
    /// Open a pool for `database_url`, sizing connections per
    /// `min_connections..=max_connections` (spec §6 `db.min_connections`,
    /// `db.max_connections`; 2-100 per §4.5).
    pub async fn connect(database_url: &str, max_connections: usize) -> Result<Self, RepositoryError> {
        validate_database_url(database_url)?;

        if is_postgres_url(database_url) {
            #[cfg(feature = "postgres")]
            {
                let manager = AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new(database_url);
                let pool = Pool::builder(manager)
                    .max_size(max_connections)
                    .build()
                    .map_err(|e| RepositoryError::Connection(e.to_string()))?;
                return Ok(DbPool::Postgres(pool));
            }
            #[cfg(not(feature = "postgres"))]
            {
                return Err(RepositoryError::UnsupportedUrl(
                    "postgres support requires the `postgres` feature".to_string(),
                ));
            }
        }

        // Accept both a bare filesystem path and a `sqlite://` URL (the
        // latter is what `Settings` builds); sqlite's own open call has no
        // concept of that scheme, so strip it before touching the filesystem.
        let fs_path = database_url.strip_prefix("sqlite://").unwrap_or(database_url);

        if let Some(parent) = std::path::Path::new(fs_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| RepositoryError::Connection(e.to_string()))?;
            }
        }
        let manager = AsyncDieselConnectionManager::<SqliteAsyncConnection>::new(fs_path);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| RepositoryError::Connection(e.to_string()))?;
        Ok(DbPool::Sqlite(pool))
    }

    pub fn is_postgres(&self) -> bool {
        match self {
            DbPool::Sqlite(_) => false,
            #[cfg(feature = "postgres")]
            DbPool::Postgres(_) => true,
        }
    }
}

/// Run an async block against whichever backend is active, dispatching to
/// the correctly typed connection. `$conn` is bound to a mutable reference
/// usable with `diesel_async::RunQueryDsl`.
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, |$conn:ident| $body:expr) => {{
        use $crate::repository::util::to_diesel_error;
        match $pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut $conn = pool
                    .get()
                    .await
                    .map_err(|e| $crate::error::RepositoryError::Connection(e.to_string()))?;
                $body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                let mut $conn = pool
                    .get()
                    .await
                    .map_err(|e| $crate::error::RepositoryError::Connection(e.to_string()))?;
                $body
            }
        }
    }};
}

/// Like `with_conn!` but for call sites that need two distinct code paths
/// per backend (e.g. backend-specific SQL dialects) rather than one shared
/// expression.
#[macro_export]
macro_rules! with_conn_split {
    ($pool:expr, |$conn:ident| $sqlite_body:expr, |$pg_conn:ident| $pg_body:expr) => {{
        match $pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut $conn = pool
                    .get()
                    .await
                    .map_err(|e| $crate::error::RepositoryError::Connection(e.to_string()))?;
                $sqlite_body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                let mut $pg_conn = pool
                    .get()
                    .await
                    .map_err(|e| $crate::error::RepositoryError::Connection(e.to_string()))?;
                $pg_body
            }
        }
    }};
}

pub(crate) async fn batch_execute_sql(conn: &mut SqliteAsyncConnection, sql: &str) -> Result<(), RepositoryError> {
    conn.batch_execute(sql).await.map_err(to_diesel_error)
}
