// Persistent configuration aggregates.
//
// Everything the original workflow needs to survive a process restart is
// held in three explicit, versioned serde structs stored as JSON in the
// `state` table: the settings aggregate, the ingest checkpoint, and the
// computed corpus statistics. Load on open, save on every mutation.
// Arbitrary keys never map onto struct fields dynamically.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::db::queries;
use crate::model::kind::{ModelKind, ModelParams};

pub const SETTINGS_VERSION: u32 = 1;

const KEY_SETTINGS: &str = "settings";
const KEY_INGEST: &str = "ingest";
const KEY_STATS: &str = "stats";

/// Corpus hyperparameters. One instance per corpus, persisted whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSettings {
    pub version: u32,
    /// Minimum word length for a "word" attribute token
    pub min_len: usize,
    /// Maximum word length for a "word" attribute token
    pub max_len: usize,
    /// Minimum number of cards a token must appear in to stay in the vocabulary
    pub no_below: i64,
    /// Maximum fraction of cards a token may appear in to stay in the vocabulary
    pub no_above: f64,
    /// Hard cap on vocabulary size
    pub keep_n: i64,
    /// Attribute-name fragments that mark relationship attributes
    pub relationship_tags: Vec<String>,
    /// Attributes (beyond "word" ones) whose values lose their accents
    pub accent_attrs: Vec<String>,
    /// Per-model weight/threshold/hyperparameters
    pub models: BTreeMap<ModelKind, ModelParams>,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        for kind in ModelKind::all() {
            models.insert(*kind, ModelParams::defaults_for(*kind));
        }
        Self {
            version: SETTINGS_VERSION,
            min_len: 4,
            max_len: 100,
            no_below: 5,
            no_above: 0.8,
            keep_n: 1_000_000,
            relationship_tags: vec!["cpf".to_string(), "cnpj".to_string()],
            accent_attrs: Vec::new(),
            models,
        }
    }
}

impl CorpusSettings {
    pub fn load(conn: &Connection) -> Result<Self> {
        load_or_default(conn, KEY_SETTINGS)
    }

    pub fn save(&self, conn: &Connection) -> Result<()> {
        save(conn, KEY_SETTINGS, self)
    }

    pub fn model_params(&self, kind: ModelKind) -> ModelParams {
        self.models
            .get(&kind)
            .copied()
            .unwrap_or_else(|| ModelParams::defaults_for(kind))
    }
}

/// Resumable-ingestion state. Present in the store only while an ingest
/// run is underway; cleared when the run finalizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestCheckpoint {
    pub source_path: String,
    pub separator: char,
    pub row_cap: Option<u64>,
    /// Rows fully committed so far; resumption starts at the next row.
    pub rows_consumed: u64,
    pub source_id: i64,
    /// Values are whole tokens already (true) or need composing with the
    /// column name (false).
    pub pre_tokenized: bool,
    /// Header name of the identity column (always the first column).
    pub card_attribute: String,
}

impl IngestCheckpoint {
    pub fn load(conn: &Connection) -> Result<Option<Self>> {
        match queries::get_state(conn, KEY_INGEST)? {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Corrupt ingest checkpoint")?,
            )),
            None => Ok(None),
        }
    }

    pub fn save(&self, conn: &Connection) -> Result<()> {
        save(conn, KEY_INGEST, self)
    }

    pub fn clear(conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM state WHERE key = ?1", [KEY_INGEST])?;
        Ok(())
    }
}

/// Token-distribution statistics over one view of the corpus (the raw
/// aggregate or the filtered one).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenStats {
    pub num_tokens: i64,
    pub doc_freq_min: i64,
    pub doc_freq_max: i64,
    pub cards_with_tokens: i64,
    pub tokens_per_card_min: i64,
    pub tokens_per_card_max: i64,
    pub tokens_per_card_mean: f64,
    /// Population standard deviation; None when the variance is zero or
    /// undefined (fewer than one distinct sample).
    pub tokens_per_card_stdev: Option<f64>,
}

/// Corpus-level counters plus the pre- and post-filter statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusStats {
    /// Rows read across all ingestion runs
    pub num_docs: u64,
    pub num_attributes: i64,
    pub num_cards: i64,
    /// Sum of all aggregated token frequencies
    pub num_words: i64,
    pub full: TokenStats,
    pub filtered: TokenStats,
}

impl CorpusStats {
    pub fn load(conn: &Connection) -> Result<Self> {
        load_or_default(conn, KEY_STATS)
    }

    pub fn save(&self, conn: &Connection) -> Result<()> {
        save(conn, KEY_STATS, self)
    }
}

fn load_or_default<T: DeserializeOwned + Default + Serialize>(
    conn: &Connection,
    key: &str,
) -> Result<T> {
    match queries::get_state(conn, key)? {
        Some(json) => {
            serde_json::from_str(&json).with_context(|| format!("Corrupt state entry {key:?}"))
        }
        None => {
            let value = T::default();
            save(conn, key, &value)?;
            Ok(value)
        }
    }
}

fn save<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    queries::set_state(conn, key, &json)
}
