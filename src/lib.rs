//! FOIAcquire archive core: routing, QC, organisation, merge, storage, and
//! authorisation for a scanned-document archive.

pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod hooks;
pub mod merge;
pub mod models;
pub mod qc;
pub mod repository;
pub mod routing;
pub mod server;
pub mod storage;

pub use error::{AppError, AppResult};
