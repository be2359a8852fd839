//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer; the password hash is never serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classboard_shared::{DiagramContent, DiagramId, Role, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Unique across all users.
    pub email: String,
    /// Hashed upstream; this crate stores it opaquely.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Input for [`Database::create_user`](crate::Database::create_user).
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
}

// ---------------------------------------------------------------------------
// Diagram
// ---------------------------------------------------------------------------

/// The diagram aggregate: row metadata, owner, share set and document.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Diagram {
    pub id: DiagramId,
    pub name: String,
    pub description: Option<String>,
    pub owner: User,
    pub shared_with: Vec<User>,
    pub content: DiagramContent,
    /// Bumped by every successful save.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Diagram {
    pub fn is_owner(&self, user: UserId) -> bool {
        self.owner.id == user
    }

    pub fn is_shared_with(&self, user: UserId) -> bool {
        self.shared_with.iter().any(|u| u.id == user)
    }

    /// Owner or shared member.
    pub fn can_access(&self, user: UserId) -> bool {
        self.is_owner(user) || self.is_shared_with(user)
    }
}

/// Input for [`Database::insert_diagram`](crate::Database::insert_diagram).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDiagram {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: DiagramContent,
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

pub(crate) fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(s).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}
