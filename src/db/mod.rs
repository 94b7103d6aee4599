// SQLite-backed token store: one database file per corpus.
//
// schema.rs owns DDL, queries.rs owns every SQL statement, models.rs the
// row structs. The connection is plain and synchronous; the pipeline is
// single-threaded by design.

pub mod models;
pub mod queries;
pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Open (creating if needed) a corpus database and ensure the schema.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open corpus database at {}", path.display()))?;
    schema::create_tables(&conn)?;
    Ok(conn)
}

/// In-memory database with the full schema, for tests and dry runs.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
    schema::create_tables(&conn)?;
    Ok(conn)
}
