//! # classboard-store
//!
//! SQLite persistence for Classboard.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the user directory
//! and for diagram aggregates (row, owner, share membership and the JSON
//! document, loaded and saved as one unit).

pub mod database;
pub mod diagrams;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
