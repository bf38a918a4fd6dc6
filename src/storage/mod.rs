//! Persistence layer.
//!
//! This module provides the SQLite storage for credentials, the ledger,
//! categories, cached exchange rates, and notifications. All operations are
//! async-safe via `tokio::task::spawn_blocking`.

mod database;
pub mod queries;
mod schema;

pub use database::{Database, DatabaseError, Result};
