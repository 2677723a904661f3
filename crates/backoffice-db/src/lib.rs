//! Backoffice DB - SQLite behind the `query` script global
//!
//! A pooled rusqlite backend. Concurrent executions each check out their
//! own connection.

pub mod sqlite;

pub use sqlite::{DatabaseError, SqliteDatabase};
