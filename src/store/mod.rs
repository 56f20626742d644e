//! Persistence layer — libSQL-backed storage for session state.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{SessionCounts, SessionRecord, SessionStore};
