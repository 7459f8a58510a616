//! `QueryableByName` row types for the raw-SQL metadata repository
//! (spec §4.5 "Metadata DB"). Kept separate from `src/models` because the
//! domain models use richer types (enums, `HashMap`s) than a DB row's flat
//! text/integer columns; repository functions convert between the two.

use diesel::sql_types::{BigInt, Bool, Integer, Nullable, Text};
use diesel::QueryableByName;

#[derive(QueryableByName, Debug, Clone)]
pub struct UserRow {
    #[diesel(sql_type = Text)]
    pub user_id: String,
    #[diesel(sql_type = Text)]
    pub username: String,
    #[diesel(sql_type = Text)]
    pub password_hash: String,
    #[diesel(sql_type = Text)]
    pub department: String,
    #[diesel(sql_type = Integer)]
    pub clearance_level: i32,
    #[diesel(sql_type = Text)]
    pub roles: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub email: Option<String>,
    #[diesel(sql_type = Bool)]
    pub active: bool,
    #[diesel(sql_type = Text)]
    pub attributes: String,
}

#[derive(QueryableByName, Debug, Clone)]
pub struct SessionRow {
    #[diesel(sql_type = Text)]
    pub session_id: String,
    #[diesel(sql_type = Text)]
    pub user_id: String,
    #[diesel(sql_type = Text)]
    pub created_at: String,
    #[diesel(sql_type = Text)]
    pub expires_at: String,
    #[diesel(sql_type = Text)]
    pub source_ip: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub user_agent: Option<String>,
}

#[derive(QueryableByName, Debug, Clone)]
pub struct ObjectRow {
    #[diesel(sql_type = Text)]
    pub object_key: String,
    #[diesel(sql_type = BigInt)]
    pub size: i64,
    #[diesel(sql_type = Text)]
    pub content_type: String,
    #[diesel(sql_type = Text)]
    pub etag: String,
    #[diesel(sql_type = Text)]
    pub version_id: String,
    #[diesel(sql_type = Text)]
    pub storage_backend: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub storage_class: Option<String>,
    #[diesel(sql_type = Text)]
    pub metadata: String,
    #[diesel(sql_type = Text)]
    pub last_modified: String,
}

#[derive(QueryableByName, Debug, Clone)]
pub struct VersionRow {
    #[diesel(sql_type = Text)]
    pub object_key: String,
    #[diesel(sql_type = Text)]
    pub version_id: String,
    #[diesel(sql_type = BigInt)]
    pub size: i64,
    #[diesel(sql_type = Text)]
    pub etag: String,
    #[diesel(sql_type = Bool)]
    pub is_latest: bool,
    #[diesel(sql_type = Nullable<Text>)]
    pub created_by: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub comment: Option<String>,
    #[diesel(sql_type = Text)]
    pub tags: String,
    #[diesel(sql_type = Text)]
    pub created_at: String,
}

#[derive(QueryableByName, Debug, Clone)]
pub struct AuditRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub timestamp: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub user_id: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub username: Option<String>,
    #[diesel(sql_type = Text)]
    pub action: String,
    #[diesel(sql_type = Text)]
    pub resource_type: String,
    #[diesel(sql_type = Text)]
    pub resource_id: String,
    #[diesel(sql_type = Bool)]
    pub allowed: bool,
    #[diesel(sql_type = Text)]
    pub ip_address: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub session_id: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub user_agent: Option<String>,
    #[diesel(sql_type = Text)]
    pub metadata: String,
}

#[derive(QueryableByName, Debug, Clone)]
pub struct HookRegistrationRow {
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Text)]
    pub hook_type: String,
    #[diesel(sql_type = Text)]
    pub target: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub method: Option<String>,
    #[diesel(sql_type = Text)]
    pub headers: String,
    #[diesel(sql_type = Text)]
    pub event_filter: String,
    #[diesel(sql_type = Integer)]
    pub retry_count: i32,
    #[diesel(sql_type = Integer)]
    pub timeout_secs: i32,
}

#[derive(QueryableByName, Debug, Clone)]
pub struct ConfigHistoryRow {
    #[diesel(sql_type = Text)]
    pub uuid: String,
    #[diesel(sql_type = Text)]
    pub created_at: String,
    #[diesel(sql_type = Text)]
    pub data: String,
    #[diesel(sql_type = Text)]
    pub format: String,
    #[diesel(sql_type = Text)]
    pub hash: String,
}

#[derive(QueryableByName, Debug, Clone)]
pub struct HookExecutionRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub hook_name: String,
    #[diesel(sql_type = Text)]
    pub event: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub object_key: Option<String>,
    #[diesel(sql_type = Bool)]
    pub success: bool,
    #[diesel(sql_type = BigInt)]
    pub execution_time_ms: i64,
    #[diesel(sql_type = Nullable<Text>)]
    pub response_or_error: Option<String>,
    #[diesel(sql_type = Text)]
    pub timestamp: String,
}
