//! `db` crate: Postgres persistence for flows and conversations.
//!
//! Flow documents are read-only here (the editor owns them). Conversation rows
//! are written only under a lease held by the engine. Row structs and SQL live
//! here; the mapping onto domain types lives in `engine::store`.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::DbError;
pub use pool::DbPool;
