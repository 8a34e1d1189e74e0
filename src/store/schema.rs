use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL,
            UNIQUE (collection, id)
        );

        CREATE INDEX IF NOT EXISTS documents_collection_seq
            ON documents (collection, seq);
        "#,
    )
    .context("applying schema migrations")?;
    Ok(())
}
