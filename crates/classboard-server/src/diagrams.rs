//! Diagram service: access control, document mutation and persistence.
//!
//! Every diagram operation (except creation and the per-user listings) first
//! resolves the diagram and checks that the caller is its owner or a shared
//! member. Document mutations then edit the in-memory aggregate and save it
//! back in one revision-checked write while holding the database lock.

use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use classboard_shared::document::{
    Attribute, AttributePatch, ElementPatch, NewClass, Position, Relation, RelationPatch,
};
use classboard_shared::{DiagramContent, DiagramId, DocumentError, UserId};
use classboard_store::{Database, Diagram, NewDiagram, NewUser, StoreError, User};

use crate::error::ServerError;

/// Shallow patch for [`DiagramService::update`]. Each present field replaces
/// the stored one wholesale.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiagramPatch {
    #[serde(default)]
    pub name: Option<String>,
    /// `Some(None)` (JSON `null`) clears the description.
    #[serde(default, deserialize_with = "present_or_null")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub content: Option<DiagramContent>,
    /// Reject the update unless the stored revision equals this value.
    #[serde(default)]
    pub expected_revision: Option<u64>,
}

/// Distinguish an explicit `null` from an absent field: absent stays `None`
/// through `#[serde(default)]`, anything present becomes `Some(..)`.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Clone)]
pub struct DiagramService {
    db: Arc<Mutex<Database>>,
}

impl DiagramService {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    // ------------------------------------------------------------------
    // User directory
    // ------------------------------------------------------------------

    pub async fn create_user(&self, new_user: NewUser) -> Result<User, ServerError> {
        let db = self.db.lock().await;
        let user = db.create_user(&new_user)?;
        info!(user = %user.id, role = %user.role, "User registered");
        Ok(user)
    }

    pub async fn find_user(&self, id: UserId) -> Result<User, ServerError> {
        let db = self.db.lock().await;
        db.find_user(id)?
            .ok_or_else(|| ServerError::NotFound(format!("User {id}")))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<User, ServerError> {
        let db = self.db.lock().await;
        db.find_user_by_email(email)?
            .ok_or_else(|| ServerError::NotFound(format!("User with email {email}")))
    }

    // ------------------------------------------------------------------
    // Aggregate CRUD
    // ------------------------------------------------------------------

    pub async fn create(&self, input: NewDiagram, owner: UserId) -> Result<Diagram, ServerError> {
        let db = self.db.lock().await;
        let diagram = db.insert_diagram(&input, owner).map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound(format!("User {owner}")),
            other => other.into(),
        })?;
        info!(diagram = %diagram.id, owner = %owner, "Diagram created");
        Ok(diagram)
    }

    /// Diagrams owned by `user_id`. Only that user may list them.
    pub async fn list_owned(
        &self,
        user_id: UserId,
        caller: UserId,
    ) -> Result<Vec<Diagram>, ServerError> {
        ensure_self(user_id, caller)?;
        let db = self.db.lock().await;
        let diagrams = db.list_owned_diagrams(user_id)?;
        debug!(user = %user_id, count = diagrams.len(), "Listed owned diagrams");
        Ok(diagrams)
    }

    /// Diagrams shared with `user_id`. Only that user may list them.
    pub async fn list_shared(
        &self,
        user_id: UserId,
        caller: UserId,
    ) -> Result<Vec<Diagram>, ServerError> {
        ensure_self(user_id, caller)?;
        let db = self.db.lock().await;
        let diagrams = db.list_shared_diagrams(user_id)?;
        debug!(user = %user_id, count = diagrams.len(), "Listed shared diagrams");
        Ok(diagrams)
    }

    pub async fn find_one(&self, id: DiagramId, caller: UserId) -> Result<Diagram, ServerError> {
        let db = self.db.lock().await;
        resolve_with_access(&db, id, caller)
    }

    pub async fn update(
        &self,
        id: DiagramId,
        patch: DiagramPatch,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        let db = self.db.lock().await;
        let mut diagram = resolve_with_access(&db, id, caller)?;

        if let Some(expected) = patch.expected_revision {
            if expected != diagram.revision {
                return Err(ServerError::Conflict(format!(
                    "Diagram is at revision {}, not {expected}",
                    diagram.revision
                )));
            }
        }

        if let Some(name) = patch.name {
            diagram.name = name;
        }
        if let Some(description) = patch.description {
            diagram.description = description;
        }
        if let Some(content) = patch.content {
            diagram.content = content;
        }

        db.save_diagram(&mut diagram)?;
        info!(diagram = %id, caller = %caller, revision = diagram.revision, "Diagram updated");
        Ok(diagram)
    }

    /// Soft delete. The row stays in storage.
    pub async fn remove(&self, id: DiagramId, caller: UserId) -> Result<(), ServerError> {
        let db = self.db.lock().await;
        resolve_with_access(&db, id, caller)?;

        if !db.soft_delete_diagram(id)? {
            return Err(ServerError::NotFound(format!("Diagram {id}")));
        }
        info!(diagram = %id, caller = %caller, "Diagram removed");
        Ok(())
    }

    /// Grant `target` access. Owner only; sharing twice is a no-op.
    pub async fn share(
        &self,
        id: DiagramId,
        target: UserId,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        let db = self.db.lock().await;
        let mut diagram = resolve_with_access(&db, id, caller)?;

        if !diagram.is_owner(caller) {
            warn!(diagram = %id, caller = %caller, "Share rejected: caller is not the owner");
            return Err(ServerError::Forbidden(
                "Only the owner can share a diagram".into(),
            ));
        }

        let target_user = db
            .find_user(target)?
            .ok_or_else(|| ServerError::NotFound(format!("User {target}")))?;

        if diagram.is_owner(target) {
            debug!(diagram = %id, "Share with owner ignored");
            return Ok(diagram);
        }

        if db.add_share(id, target)? {
            diagram.shared_with.push(target_user);
            info!(diagram = %id, target = %target, "Diagram shared");
        } else {
            debug!(diagram = %id, target = %target, "Already shared");
        }
        Ok(diagram)
    }

    // ------------------------------------------------------------------
    // Document mutations
    // ------------------------------------------------------------------

    pub async fn update_element(
        &self,
        id: DiagramId,
        element_id: &str,
        patch: ElementPatch,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "update_element", |doc| {
            doc.update_element(element_id, patch);
            Ok(())
        })
        .await
    }

    pub async fn move_element(
        &self,
        id: DiagramId,
        element_id: &str,
        position: Position,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "move_element", |doc| {
            doc.move_element(element_id, position);
            Ok(())
        })
        .await
    }

    pub async fn add_class(
        &self,
        id: DiagramId,
        class_id: &str,
        class: NewClass,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "add_class", |doc| {
            doc.add_class(class_id, class).map(drop)
        })
        .await
    }

    /// Removes the class and every relation touching it.
    pub async fn remove_class(
        &self,
        id: DiagramId,
        class_id: &str,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "remove_class", |doc| {
            let (_, cascaded) = doc.remove_class(class_id)?;
            if !cascaded.is_empty() {
                debug!(class = class_id, relations = ?cascaded, "Cascaded relation removal");
            }
            Ok(())
        })
        .await
    }

    pub async fn add_attribute(
        &self,
        id: DiagramId,
        class_id: &str,
        attribute: Attribute,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "add_attribute", |doc| {
            doc.add_attribute(class_id, attribute).map(drop)
        })
        .await
    }

    pub async fn update_attribute(
        &self,
        id: DiagramId,
        class_id: &str,
        index: usize,
        patch: AttributePatch,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "update_attribute", |doc| {
            doc.update_attribute(class_id, index, patch).map(drop)
        })
        .await
    }

    /// Later attributes shift down; indices held by callers go stale.
    pub async fn remove_attribute(
        &self,
        id: DiagramId,
        class_id: &str,
        index: usize,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "remove_attribute", |doc| {
            doc.remove_attribute(class_id, index).map(drop)
        })
        .await
    }

    pub async fn add_relation(
        &self,
        id: DiagramId,
        relation_id: &str,
        relation: Relation,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "add_relation", |doc| {
            doc.add_relation(relation_id, relation)?;
            log_dangling_relations(doc);
            Ok(())
        })
        .await
    }

    pub async fn update_relation(
        &self,
        id: DiagramId,
        relation_id: &str,
        patch: RelationPatch,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "update_relation", |doc| {
            doc.update_relation(relation_id, patch)?;
            log_dangling_relations(doc);
            Ok(())
        })
        .await
    }

    pub async fn remove_relation(
        &self,
        id: DiagramId,
        relation_id: &str,
        caller: UserId,
    ) -> Result<Diagram, ServerError> {
        self.mutate(id, caller, "remove_relation", |doc| {
            doc.remove_relation(relation_id).map(drop)
        })
        .await
    }

    /// Resolve, apply `edit` to the document, persist. A failed edit leaves
    /// storage untouched.
    async fn mutate<F>(
        &self,
        id: DiagramId,
        caller: UserId,
        op: &'static str,
        edit: F,
    ) -> Result<Diagram, ServerError>
    where
        F: FnOnce(&mut DiagramContent) -> Result<(), DocumentError>,
    {
        let db = self.db.lock().await;
        let mut diagram = resolve_with_access(&db, id, caller)?;

        edit(&mut diagram.content).map_err(|e| {
            debug!(diagram = %id, op, error = %e, "Document edit rejected");
            ServerError::from(e)
        })?;

        db.save_diagram(&mut diagram)?;
        info!(diagram = %id, caller = %caller, op, revision = diagram.revision, "Diagram mutated");
        Ok(diagram)
    }

    #[cfg(test)]
    pub(crate) async fn database(&self) -> tokio::sync::MutexGuard<'_, Database> {
        self.db.lock().await
    }
}

/// Load a live diagram and check the caller is its owner or a shared member.
fn resolve_with_access(
    db: &Database,
    id: DiagramId,
    caller: UserId,
) -> Result<Diagram, ServerError> {
    let diagram = db
        .get_diagram(id)?
        .ok_or_else(|| ServerError::NotFound(format!("Diagram {id}")))?;

    if !diagram.can_access(caller) {
        warn!(diagram = %id, caller = %caller, "Access denied");
        return Err(ServerError::Forbidden(format!(
            "No access to diagram {id}"
        )));
    }
    Ok(diagram)
}

/// Relations may point at ids that are not (yet) elements; report them.
fn log_dangling_relations(doc: &DiagramContent) {
    let dangling = doc.dangling_relations();
    if !dangling.is_empty() {
        debug!(relations = ?dangling, "Relations reference missing elements");
    }
}

fn ensure_self(user_id: UserId, caller: UserId) -> Result<(), ServerError> {
    if user_id != caller {
        return Err(ServerError::Forbidden(
            "Cannot list another user's diagrams".into(),
        ));
    }
    Ok(())
}
