// Database schema: table creation and migrations.
//
// One SQLite database per corpus. A `schema_version` table tracks which
// migrations have run; each migration is a function that executes SQL.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent, safe to call on every open.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per ingestion invocation, for lineage
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY,
            origin TEXT NOT NULL,
            row_cap INTEGER,
            date TEXT NOT NULL
        );

        -- Cards: the application assigns ids densely in first-seen order,
        -- so the table carries its own id rather than a rowid
        CREATE TABLE IF NOT EXISTS cards (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS attributes (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tokens (
            id INTEGER PRIMARY KEY,
            text TEXT NOT NULL
        );

        -- Aggregated card x token frequencies, accumulated across runs
        CREATE TABLE IF NOT EXISTS frequencies (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL,
            token_id INTEGER NOT NULL,
            freq INTEGER NOT NULL
        );

        -- Append-only detail log: the system of record. Never updated.
        CREATE TABLE IF NOT EXISTS occurrences (
            id INTEGER PRIMARY KEY,
            source_id INTEGER NOT NULL,
            card_id INTEGER NOT NULL,
            attribute_id INTEGER NOT NULL,
            token_id INTEGER NOT NULL,
            freq INTEGER NOT NULL
        );

        -- Filtered vocabulary: dense vocab_index 0..V-1, rebuilt wholesale
        CREATE TABLE IF NOT EXISTS vocabulary (
            token_id INTEGER NOT NULL,
            token TEXT NOT NULL,
            doc_freq INTEGER NOT NULL,
            vocab_index INTEGER
        );

        -- Materialized bag-of-tokens view over the vocabulary
        CREATE TABLE IF NOT EXISTS filtered_corpus (
            card_id INTEGER NOT NULL,
            vocab_index INTEGER NOT NULL,
            card TEXT NOT NULL,
            token TEXT NOT NULL,
            freq INTEGER NOT NULL
        );

        -- Persisted similarity indices: one transformed vector per
        -- (model kind, card), stored as a JSON sparse vector
        CREATE TABLE IF NOT EXISTS model_vectors (
            model TEXT NOT NULL,
            card_id INTEGER NOT NULL,
            vector TEXT NOT NULL,
            PRIMARY KEY (model, card_id)
        );

        -- Key-value state: settings aggregate, ingest checkpoint, statistics
        CREATE TABLE IF NOT EXISTS state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_cards_name ON cards(name);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_attributes_name ON attributes(name);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_text ON tokens(text);
        CREATE INDEX IF NOT EXISTS idx_frequencies_pair ON frequencies(card_id, token_id);
        CREATE INDEX IF NOT EXISTS idx_frequencies_token ON frequencies(token_id);
        CREATE INDEX IF NOT EXISTS idx_vocabulary_token ON vocabulary(token);
        CREATE INDEX IF NOT EXISTS idx_filtered_card ON filtered_corpus(card_id);
        ",
    )
    .context("Failed to create corpus tables")?;

    // Record initial schema version if not already set
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
/// The migration function receives the connection and should execute its SQL.
#[allow(dead_code)]
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
