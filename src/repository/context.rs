//! Metadata DB context: schema initialisation and a placeholder helper for
//! writing SQL that runs unmodified against both SQLite and PostgreSQL.

use diesel_async::RunQueryDsl;

use crate::error::RepositoryError;

use super::pool::DbPool;
use super::schema_sql::SQLITE_SCHEMA;
#[cfg(feature = "postgres")]
use super::schema_sql::POSTGRES_SCHEMA;
use super::util::to_diesel_error;
use crate::{with_conn, with_conn_split};

/// Owns the metadata DB connection pool and creates the schema used by the
/// storage abstraction, authorisation core, and hook dispatcher (spec §4.5,
/// §4.6, §4.7): `users`, `sessions`, `objects`, `versions`, `audit_events`,
/// `hook_registrations`, `hook_executions`.
pub struct DieselDbContext {
    pool: DbPool,
}

impl DieselDbContext {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Create all tables if they do not already exist.
    pub async fn init_schema(&self) -> Result<(), RepositoryError> {
        with_conn_split!(
            &self.pool,
            |conn| {
                diesel_async::AsyncConnection::batch_execute(&mut conn, SQLITE_SCHEMA)
                    .await
                    .map_err(to_diesel_error)
            },
            |pg_conn| {
                #[cfg(feature = "postgres")]
                {
                    diesel_async::AsyncConnection::batch_execute(&mut pg_conn, POSTGRES_SCHEMA)
                        .await
                        .map_err(to_diesel_error)
                }
                #[cfg(not(feature = "postgres"))]
                {
                    let _ = pg_conn;
                    unreachable!("postgres feature disabled")
                }
            }
        )
    }

    /// Quick connectivity check used by health checks and tests.
    pub async fn test_connection(&self) -> Result<(), RepositoryError> {
        with_conn!(&self.pool, |conn| {
            diesel::sql_query("SELECT 1")
                .execute(&mut conn)
                .await
                .map_err(to_diesel_error)?;
            Ok(())
        })
    }

    /// `true` bind placeholder scheme for the active backend: SQLite uses
    /// positional `?`, PostgreSQL uses numbered `$1, $2, ...`.
    pub fn placeholder(&self, index: usize) -> String {
        if self.pool.is_postgres() {
            format!("${index}")
        } else {
            "?".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("metadata.db");
        let pool = DbPool::connect(db_path.to_str().unwrap(), 4).await.unwrap();
        let ctx = DieselDbContext::new(pool);
        ctx.init_schema().await.unwrap();
        ctx.init_schema().await.unwrap();
        ctx.test_connection().await.unwrap();
    }
}
