// Database queries. Every SQL statement the corpus issues lives here.
//
// This keeps SQL contained in one place and gives the rest of the crate
// clean Rust interfaces. Registry helpers have get-or-create semantics:
// look up by natural key, insert on miss, and hand back the assigned id.
// No deletes are ever issued against cards, attributes, or tokens.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{BowEntry, OccurrenceRow, SourceRecord};

// --- Key-value state ---

/// Get a state value by key (e.g. "settings", "ingest").
pub fn get_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Set a state value (upsert).
pub fn set_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

// --- Sources ---

/// Record one ingestion invocation and return its id.
pub fn record_source(conn: &Connection, origin: &str, row_cap: Option<u64>) -> Result<i64> {
    let date = chrono::Local::now().date_naive().to_string();
    // SQLite has no unsigned integer affinity, so the cap crosses the
    // boundary as i64
    conn.execute(
        "INSERT INTO sources (origin, row_cap, date) VALUES (?1, ?2, ?3)",
        params![origin, row_cap.map(|v| v as i64), date],
    )?;
    Ok(conn.last_insert_rowid())
}

/// List recorded sources, oldest first.
pub fn sources(conn: &Connection) -> Result<Vec<SourceRecord>> {
    let mut stmt = conn.prepare("SELECT id, origin, row_cap, date FROM sources ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(SourceRecord {
            id: row.get(0)?,
            origin: row.get(1)?,
            row_cap: row.get::<_, Option<i64>>(2)?.map(|v| v as u64),
            date: row.get(3)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

// --- Registries ---

/// Get or create a card by its (already normalized) name.
///
/// Card ids are assigned by the application, densely in first-seen order:
/// the next id is simply the current card count.
pub fn get_or_create_card(conn: &Connection, name: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM cards WHERE name = ?1", params![name], |row| {
            row.get(0)
        })
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let next_id: i64 = conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;
    conn.execute(
        "INSERT INTO cards (id, name) VALUES (?1, ?2)",
        params![next_id, name],
    )?;
    Ok(next_id)
}

/// Get or create an attribute by name.
pub fn get_or_create_attribute(conn: &Connection, name: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM attributes WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute("INSERT INTO attributes (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

/// Register a list of attribute names, returning name -> id.
pub fn register_attributes(conn: &Connection, names: &[String]) -> Result<HashMap<String, i64>> {
    let mut ids = HashMap::new();
    for name in names {
        ids.insert(name.clone(), get_or_create_attribute(conn, name)?);
    }
    Ok(ids)
}

/// Get or create a token by its text.
pub fn get_or_create_token(conn: &Connection, text: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM tokens WHERE text = ?1",
            params![text],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute("INSERT INTO tokens (text) VALUES (?1)", params![text])?;
    Ok(conn.last_insert_rowid())
}

// --- Occurrences & frequencies ---

/// Record one row's occurrence batch: append each entry to the detail log
/// and accumulate the aggregated (card, token) frequency. The whole batch
/// commits as one transaction so a crash never leaves half a row behind.
pub fn record_occurrences(conn: &Connection, batch: &[OccurrenceRow]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    append_occurrences(&tx, batch)?;
    tx.commit()?;
    Ok(())
}

/// The statements behind [`record_occurrences`], without the transaction.
/// Callers that must commit the batch together with other writes (the
/// ingestion checkpoint, the absorption watermark) open the transaction
/// themselves and pass it here.
pub fn append_occurrences(conn: &Connection, batch: &[OccurrenceRow]) -> Result<()> {
    for occ in batch {
        let existing: Option<(i64, i64)> = conn
            .query_row(
                "SELECT id, freq FROM frequencies WHERE card_id = ?1 AND token_id = ?2",
                params![occ.card_id, occ.token_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match existing {
            Some((id, freq)) => {
                conn.execute(
                    "UPDATE frequencies SET freq = ?1 WHERE id = ?2",
                    params![freq + occ.freq, id],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO frequencies (card_id, token_id, freq) VALUES (?1, ?2, ?3)",
                    params![occ.card_id, occ.token_id, occ.freq],
                )?;
            }
        }
        conn.execute(
            "INSERT INTO occurrences (source_id, card_id, attribute_id, token_id, freq)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                occ.source_id,
                occ.card_id,
                occ.attribute_id,
                occ.token_id,
                occ.freq
            ],
        )?;
    }
    Ok(())
}

/// Regenerate the aggregate table from the occurrence log. The log is the
/// system of record, so this recovers `frequencies` after corruption.
pub fn rebuild_frequencies(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM frequencies", [])?;
    tx.execute(
        "INSERT INTO frequencies (card_id, token_id, freq)
         SELECT card_id, token_id, SUM(freq)
         FROM occurrences
         GROUP BY card_id, token_id",
        [],
    )?;
    tx.commit()?;
    Ok(())
}

// --- Lookups & counters ---

/// Resolve a (normalized) card name to its id.
pub fn card_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row("SELECT id FROM cards WHERE name = ?1", params![name], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(id)
}

/// Resolve a card id back to its name.
pub fn card_name(conn: &Connection, id: i64) -> Result<Option<String>> {
    let name = conn
        .query_row("SELECT name FROM cards WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(name)
}

pub fn card_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?)
}

/// All card names in id order, the same order their vectors occupy.
pub fn cards(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM cards ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn attribute_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM attributes", [], |row| row.get(0))?)
}

pub fn attributes(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM attributes ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Total processed word count: the sum of all aggregated frequencies.
pub fn word_count(conn: &Connection) -> Result<i64> {
    let sum: Option<i64> =
        conn.query_row("SELECT SUM(freq) FROM frequencies", [], |row| row.get(0))?;
    Ok(sum.unwrap_or(0))
}

// --- Filtered corpus ---

pub fn vocabulary_size(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM vocabulary", [], |row| row.get(0))?)
}

/// Bag-of-tokens for one card over the filtered vocabulary.
pub fn bow_for_card(conn: &Connection, card_id: i64) -> Result<Vec<BowEntry>> {
    let mut stmt = conn.prepare(
        "SELECT vocab_index, freq FROM filtered_corpus WHERE card_id = ?1 ORDER BY vocab_index",
    )?;
    let rows = stmt.query_map(params![card_id], |row| {
        Ok(BowEntry {
            vocab_index: row.get::<_, i64>(0)? as usize,
            freq: row.get(1)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

// --- Model vectors (similarity indices) ---

/// Replace a model's persisted index with freshly transformed vectors.
pub fn save_model_vectors(
    conn: &Connection,
    model: &str,
    vectors: &[(i64, String)],
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM model_vectors WHERE model = ?1", params![model])?;
    for (card_id, json) in vectors {
        tx.execute(
            "INSERT INTO model_vectors (model, card_id, vector) VALUES (?1, ?2, ?3)",
            params![model, card_id, json],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Load a model's full index (card_id, vector JSON), in card-id order.
pub fn load_model_vectors(conn: &Connection, model: &str) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn
        .prepare("SELECT card_id, vector FROM model_vectors WHERE model = ?1 ORDER BY card_id")?;
    let rows = stmt.query_map(params![model], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Whether a model has a built (non-empty) index.
pub fn has_model_vectors(conn: &Connection, model: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM model_vectors WHERE model = ?1",
        params![model],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
