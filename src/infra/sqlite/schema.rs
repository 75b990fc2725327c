use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};

pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open db: {}", db_path.display()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("failed to enable foreign key enforcement")?;
    Ok(conn)
}

/// Connection for page reads. Never creates the database file.
pub fn open_read_connection(db_path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open db for reading: {}", db_path.display()))
}

pub fn init_db(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent dir: {}", parent.display()))?;
    }

    let conn = open_connection(db_path)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS educational_resources (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            source_              TEXT NOT NULL,
            content_description_ TEXT NOT NULL,
            additional_details_  TEXT,
            answer_              TEXT,
            score_               REAL
        );

        CREATE INDEX IF NOT EXISTS idx_edu_score
            ON educational_resources(score_);

        CREATE INDEX IF NOT EXISTS idx_edu_source
            ON educational_resources(source_);
        ",
    )
    .context("failed to initialize schema")?;

    Ok(())
}
