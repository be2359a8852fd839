use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Optimistic concurrency counter, bumped on every aggregate save
ALTER TABLE diagrams ADD COLUMN revision INTEGER NOT NULL DEFAULT 0;

CREATE INDEX IF NOT EXISTS idx_diagrams_owner ON diagrams(owner_id, deleted_at);
CREATE INDEX IF NOT EXISTS idx_diagram_shares_user ON diagram_shares(user_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
