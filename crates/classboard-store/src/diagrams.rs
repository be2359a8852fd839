//! Persistence for diagram aggregates.
//!
//! A diagram is read as one unit: the `diagrams` row joined with its owner,
//! plus the share membership rows. It is written back as one unit by
//! [`Database::save_diagram`], which compares the stored `revision` and
//! refuses stale writes.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use classboard_shared::{DiagramId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{conversion_error, parse_timestamp, parse_uuid, Diagram, NewDiagram, User};
use crate::users::{user_from_row, USER_COLUMNS};

const DIAGRAM_SELECT: &str = "SELECT d.id, d.name, d.description, d.content, d.revision,
            d.created_at, d.updated_at, d.deleted_at,
            u.id, u.name, u.email, u.password_hash, u.role, u.created_at
     FROM diagrams d
     JOIN users u ON u.id = d.owner_id";

/// Column index where the joined owner columns start.
const OWNER_OFFSET: usize = 8;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new diagram owned by `owner`. Fails with
    /// [`StoreError::NotFound`] when the owner is not registered.
    pub fn insert_diagram(&self, new_diagram: &NewDiagram, owner: UserId) -> Result<Diagram> {
        let owner = self.find_user(owner)?.ok_or(StoreError::NotFound)?;
        let now = Utc::now();

        let diagram = Diagram {
            id: DiagramId::new(),
            name: new_diagram.name.clone(),
            description: new_diagram.description.clone(),
            owner,
            shared_with: Vec::new(),
            content: new_diagram.content.clone(),
            revision: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        self.conn().execute(
            "INSERT INTO diagrams
                 (id, name, description, owner_id, content, revision, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            params![
                diagram.id.to_string(),
                diagram.name,
                diagram.description,
                diagram.owner.id.to_string(),
                serde_json::to_string(&diagram.content)?,
                now.to_rfc3339(),
            ],
        )?;

        Ok(diagram)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a live (not soft-deleted) diagram with owner and shares.
    pub fn get_diagram(&self, id: DiagramId) -> Result<Option<Diagram>> {
        let diagram = self
            .conn()
            .query_row(
                &format!("{DIAGRAM_SELECT} WHERE d.id = ?1 AND d.deleted_at IS NULL"),
                params![id.to_string()],
                row_to_diagram,
            )
            .optional()?;

        diagram.map(|d| self.with_shares(d)).transpose()
    }

    /// Live diagrams owned by `owner`, newest first.
    pub fn list_owned_diagrams(&self, owner: UserId) -> Result<Vec<Diagram>> {
        self.query_diagrams(
            &format!(
                "{DIAGRAM_SELECT}
                 WHERE d.owner_id = ?1 AND d.deleted_at IS NULL
                 ORDER BY d.created_at DESC"
            ),
            owner,
        )
    }

    /// Live diagrams that have `user` in their share set, newest first.
    pub fn list_shared_diagrams(&self, user: UserId) -> Result<Vec<Diagram>> {
        self.query_diagrams(
            &format!(
                "{DIAGRAM_SELECT}
                 JOIN diagram_shares s ON s.diagram_id = d.id
                 WHERE s.user_id = ?1 AND d.deleted_at IS NULL
                 ORDER BY d.created_at DESC"
            ),
            user,
        )
    }

    /// Users a diagram is shared with, in the order they were added.
    pub fn list_shares(&self, diagram_id: DiagramId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM diagram_shares s
             JOIN users u ON u.id = s.user_id
             WHERE s.diagram_id = ?1
             ORDER BY s.created_at ASC, u.email ASC",
            prefixed_user_columns()
        ))?;

        let rows = stmt.query_map(params![diagram_id.to_string()], |row| user_from_row(row, 0))?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Write the aggregate's mutable fields back to storage.
    ///
    /// The write only applies if the stored revision still equals
    /// `diagram.revision`; otherwise [`StoreError::StaleRevision`] is returned
    /// and nothing changes. On success `revision` and `updated_at` are
    /// advanced in place.
    pub fn save_diagram(&self, diagram: &mut Diagram) -> Result<()> {
        let now = Utc::now();
        let affected = self.conn().execute(
            "UPDATE diagrams
             SET name = ?1, description = ?2, content = ?3,
                 revision = revision + 1, updated_at = ?4
             WHERE id = ?5 AND revision = ?6 AND deleted_at IS NULL",
            params![
                diagram.name,
                diagram.description,
                serde_json::to_string(&diagram.content)?,
                now.to_rfc3339(),
                diagram.id.to_string(),
                diagram.revision as i64,
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::StaleRevision {
                expected: diagram.revision,
            });
        }

        diagram.revision += 1;
        diagram.updated_at = now;
        Ok(())
    }

    /// Add `user` to the diagram's share set. Returns `false` when the user
    /// was already a member.
    pub fn add_share(&self, diagram_id: DiagramId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO diagram_shares (diagram_id, user_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                diagram_id.to_string(),
                user.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Mark a diagram deleted. The row is kept. Returns `true` if a live row
    /// was marked.
    pub fn soft_delete_diagram(&self, id: DiagramId) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let affected = self.conn().execute(
            "UPDATE diagrams
             SET deleted_at = ?1, updated_at = ?1, revision = revision + 1
             WHERE id = ?2 AND deleted_at IS NULL",
            params![now, id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn query_diagrams(&self, sql: &str, user: UserId) -> Result<Vec<Diagram>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![user.to_string()], row_to_diagram)?;

        let mut diagrams = Vec::new();
        for row in rows {
            diagrams.push(row?);
        }
        drop(stmt);

        diagrams.into_iter().map(|d| self.with_shares(d)).collect()
    }

    fn with_shares(&self, mut diagram: Diagram) -> Result<Diagram> {
        diagram.shared_with = self.list_shares(diagram.id)?;
        Ok(diagram)
    }
}

fn prefixed_user_columns() -> String {
    USER_COLUMNS
        .split(", ")
        .map(|c| format!("u.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map a [`DIAGRAM_SELECT`] row to a [`Diagram`] with an empty share set.
fn row_to_diagram(row: &rusqlite::Row<'_>) -> rusqlite::Result<Diagram> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let description: Option<String> = row.get(2)?;
    let content_json: String = row.get(3)?;
    let revision: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;
    let deleted_str: Option<String> = row.get(7)?;

    let content = serde_json::from_str(&content_json).map_err(|e| conversion_error(3, e))?;

    let deleted_at = deleted_str
        .map(|s| parse_timestamp(7, &s))
        .transpose()?;

    Ok(Diagram {
        id: DiagramId(parse_uuid(0, &id_str)?),
        name,
        description,
        owner: user_from_row(row, OWNER_OFFSET)?,
        shared_with: Vec::new(),
        content,
        revision: revision.max(0) as u64,
        created_at: parse_timestamp(5, &created_str)?,
        updated_at: parse_timestamp(6, &updated_str)?,
        deleted_at,
    })
}
