//! User directory: identity records looked up by id or email.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use classboard_shared::{Role, UserId};

use crate::database::Database;
use crate::error::{map_constraint, Result};
use crate::models::{conversion_error, parse_timestamp, parse_uuid, NewUser, User};

pub(crate) const USER_COLUMNS: &str = "id, name, email, password_hash, role, created_at";

impl Database {
    /// Register a new user. A duplicate email yields [`StoreError::Conflict`].
    ///
    /// [`StoreError::Conflict`]: crate::StoreError::Conflict
    pub fn create_user(&self, new_user: &NewUser) -> Result<User> {
        let user = User {
            id: UserId::new(),
            name: new_user.name.clone(),
            email: new_user.email.trim().to_string(),
            password_hash: new_user.password_hash.clone(),
            role: new_user.role,
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO users (id, name, email, password_hash, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    user.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| map_constraint(e, "email already registered"))?;

        tracing::debug!(user = %user.id, "user created");
        Ok(user)
    }

    pub fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email.trim()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }
}

/// Map a row selected with [`USER_COLUMNS`] (starting at `offset`) to a [`User`].
pub(crate) fn user_from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<User> {
    let id_str: String = row.get(offset)?;
    let name: String = row.get(offset + 1)?;
    let email: String = row.get(offset + 2)?;
    let password_hash: String = row.get(offset + 3)?;
    let role_str: String = row.get(offset + 4)?;
    let created_str: String = row.get(offset + 5)?;

    let role = role_str
        .parse::<Role>()
        .map_err(|e| conversion_error(offset + 4, e))?;

    Ok(User {
        id: UserId(parse_uuid(offset, &id_str)?),
        name,
        email,
        password_hash,
        role,
        created_at: parse_timestamp(offset + 5, &created_str)?,
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    user_from_row(row, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;

    fn alice() -> NewUser {
        NewUser {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$argon2id$stub".into(),
            role: Role::User,
        }
    }

    #[test]
    fn create_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let created = db.create_user(&alice()).unwrap();

        let by_id = db.find_user(created.id).unwrap().unwrap();
        assert_eq!(by_id, created);

        let by_email = db.find_user_by_email(" alice@example.com ").unwrap().unwrap();
        assert_eq!(by_email.id, created.id);

        assert!(db.find_user(UserId::new()).unwrap().is_none());
        assert!(db.find_user_by_email("bob@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&alice()).unwrap();
        assert!(matches!(
            db.create_user(&alice()),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(&alice()).unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "user");
    }
}
