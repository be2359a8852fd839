use thiserror::Error;

/// Failures of in-place document mutations.
///
/// Variants split into two families: `*Exists` (the caller tried to create an
/// id that is already taken) and `*NotFound` (the addressed node is absent).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Class already exists: {0}")]
    ClassExists(String),

    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Attribute {index} not found on class {class_id} ({len} attributes)")]
    AttributeNotFound {
        class_id: String,
        index: usize,
        len: usize,
    },

    #[error("Relation already exists: {0}")]
    RelationExists(String),

    #[error("Relation not found: {0}")]
    RelationNotFound(String),
}

impl DocumentError {
    /// `true` when the error is a duplicate-id rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DocumentError::ClassExists(_) | DocumentError::RelationExists(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);
