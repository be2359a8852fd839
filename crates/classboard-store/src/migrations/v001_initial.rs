//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `users`, `diagrams`, and `diagram_shares`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,               -- hashed upstream, never returned
    role          TEXT NOT NULL DEFAULT 'user',
    created_at    TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Diagrams
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS diagrams (
    id          TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name        TEXT NOT NULL,
    description TEXT,
    owner_id    TEXT NOT NULL,                 -- FK -> users(id)
    content     TEXT NOT NULL DEFAULT '{}',    -- JSON document
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    deleted_at  TEXT,                          -- soft delete marker

    FOREIGN KEY (owner_id) REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- Share membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS diagram_shares (
    diagram_id TEXT NOT NULL,                  -- FK -> diagrams(id)
    user_id    TEXT NOT NULL,                  -- FK -> users(id)
    created_at TEXT NOT NULL,

    PRIMARY KEY (diagram_id, user_id),
    FOREIGN KEY (diagram_id) REFERENCES diagrams(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
