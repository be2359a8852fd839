//! # classboard-shared
//!
//! Types shared by the store and the server: identifiers, user roles, and the
//! class-diagram document together with its in-place mutation functions.

pub mod document;
pub mod error;
pub mod types;

pub use document::DiagramContent;
pub use error::DocumentError;
pub use types::{DiagramId, Role, UserId};
