//! Metadata DB repository layer: dual SQLite/PostgreSQL pool, inline
//! schema, and per-table repositories (spec §4.5, §4.6, §4.7, §9).

pub mod context;
pub mod metadata;
pub mod pool;
pub mod rows;
pub mod schema_sql;
pub mod util;

pub use context::DieselDbContext;
pub use metadata::{
    AuditRepository, ConfigHistoryEntry, ConfigHistoryRepository, HookRepository, ObjectRepository, SessionRepository,
    UserRepository, VersionRepository,
};
pub use pool::DbPool;
