// A project groups corpora under one directory. Single-corpus projects
// hold one database named after the project; dimensioned projects hold
// one corpus per dimension plus the reserved "relationships" dimension,
// which is never ingested directly: it absorbs the relationship tokens
// every other dimension extracts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::corpus::{Corpus, RelationshipSink};
use crate::db::models::OccurrenceRow;
use crate::db::queries;
use crate::fusion::{self, QueryOutcome, WeightedList};
use crate::ingest::{self, IngestOptions, IngestOutcome};
use crate::text::link_name;

pub const RELATIONSHIPS_DIMENSION: &str = "Relationships";
const KEY_PROJECT: &str = "project";
const PROJECT_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionEntry {
    pub name: String,
    pub weight: f64,
}

/// The project-level registry, persisted whole in the project database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    pub version: u32,
    pub dimensioned: bool,
    /// Query results are truncated to this many cards outside test mode.
    pub max_results: usize,
    /// Dimension link name -> display name and fusion weight.
    pub dimensions: BTreeMap<String, DimensionEntry>,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self {
            version: PROJECT_STATE_VERSION,
            dimensioned: false,
            max_results: 10,
            dimensions: BTreeMap::new(),
        }
    }
}

pub struct Project {
    pub name: String,
    pub link: String,
    dir: PathBuf,
    conn: Connection,
    pub state: ProjectState,
}

impl Project {
    /// Open (creating if needed) the project named `name` under
    /// `data_dir`. `dimensioned` only matters on first open; an existing
    /// project keeps its stored layout and a conflicting hint is ignored
    /// with a warning.
    pub fn open(data_dir: &Path, name: &str, dimensioned: Option<bool>) -> Result<Self> {
        let link = link_name(name);
        let dir = data_dir.join(&link);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create project directory {}", dir.display()))?;
        let db_path = dir.join("project.db");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open project database at {}", db_path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;

        let state = match queries::get_state(&conn, KEY_PROJECT)? {
            Some(json) => {
                let state: ProjectState =
                    serde_json::from_str(&json).context("Corrupt project state")?;
                if let Some(hint) = dimensioned {
                    if hint != state.dimensioned {
                        warn!(
                            project = %link,
                            stored = state.dimensioned,
                            "project layout is fixed at creation; ignoring the conflicting flag"
                        );
                    }
                }
                state
            }
            None => {
                let mut state = ProjectState {
                    dimensioned: dimensioned.unwrap_or(false),
                    ..Default::default()
                };
                if state.dimensioned {
                    state.dimensions.insert(
                        link_name(RELATIONSHIPS_DIMENSION),
                        DimensionEntry {
                            name: RELATIONSHIPS_DIMENSION.to_string(),
                            weight: 1.0,
                        },
                    );
                }
                let json = serde_json::to_string(&state)?;
                queries::set_state(&conn, KEY_PROJECT, &json)?;
                info!(project = %link, dimensioned = state.dimensioned, "project created");
                state
            }
        };

        Ok(Self {
            name: name.to_string(),
            link,
            dir,
            conn,
            state,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn save_state(&self) -> Result<()> {
        let json = serde_json::to_string(&self.state)?;
        queries::set_state(&self.conn, KEY_PROJECT, &json)
    }

    pub fn set_max_results(&mut self, max_results: usize) -> Result<()> {
        self.state.max_results = max_results;
        self.save_state()
    }

    /// Register a new dimension with weight 1.0.
    pub fn add_dimension(&mut self, name: &str) -> Result<()> {
        if !self.state.dimensioned {
            bail!("project {:?} is single-corpus and has no dimensions", self.link);
        }
        let link = link_name(name);
        if self.state.dimensions.contains_key(&link) {
            bail!("dimension {link:?} already exists");
        }
        self.state.dimensions.insert(
            link,
            DimensionEntry {
                name: name.to_string(),
                weight: 1.0,
            },
        );
        self.save_state()
    }

    pub fn set_dimension_weight(&mut self, name: &str, weight: f64) -> Result<()> {
        let link = link_name(name);
        let entry = self
            .state
            .dimensions
            .get_mut(&link)
            .with_context(|| format!("no dimension named {link:?}"))?;
        entry.weight = weight;
        self.save_state()
    }

    /// Open the corpus behind `dimension`, or the project's single corpus
    /// when `dimension` is None.
    pub fn corpus(&self, dimension: Option<&str>) -> Result<Corpus> {
        match dimension {
            None if self.state.dimensioned => {
                bail!("project {:?} is dimensioned; name a dimension", self.link)
            }
            None => Corpus::open(&self.dir, &self.name),
            Some(_) if !self.state.dimensioned => {
                bail!("project {:?} is single-corpus and has no dimensions", self.link)
            }
            Some(name) => {
                let link = link_name(name);
                let entry = self
                    .state
                    .dimensions
                    .get(&link)
                    .with_context(|| format!("no dimension named {link:?}"))?;
                let mut corpus = Corpus::open(&self.dir, &entry.name)?;
                if link == link_name(RELATIONSHIPS_DIMENSION) {
                    corpus.accepts_direct_ingest = false;
                }
                Ok(corpus)
            }
        }
    }

    /// Ingest a source file. In dimensioned mode the run targets one
    /// dimension and its relationship tokens are diverted into the
    /// relationships dimension.
    pub fn ingest(
        &self,
        dimension: Option<&str>,
        file: Option<&Path>,
        opts: &IngestOptions,
    ) -> Result<IngestOutcome> {
        let mut corpus = self.corpus(dimension)?;
        if self.state.dimensioned {
            let mut sink = DimensionSink::new(
                self.corpus(Some(RELATIONSHIPS_DIMENSION))?,
                corpus.link.clone(),
            );
            ingest::ingest(&mut corpus, Some(&mut sink), file, opts)
        } else {
            ingest::ingest(&mut corpus, None, file, opts)
        }
    }

    /// Rank the cards most similar to `card`. In dimensioned mode each
    /// selected dimension is queried and the ranked lists are fused with
    /// the dimension weights; a dimension whose query is unavailable
    /// contributes nothing and drops out of the weighting.
    pub fn similar(
        &self,
        card: &str,
        dimensions: Option<&[String]>,
        keep_all: bool,
    ) -> Result<QueryOutcome> {
        if !self.state.dimensioned {
            let outcome = self.corpus(None)?.similar(card, keep_all)?;
            return Ok(self.truncate(outcome, keep_all));
        }

        let selected: Vec<&str> = match dimensions {
            Some(names) if !names.is_empty() => names.iter().map(|s| s.as_str()).collect(),
            _ => self
                .state
                .dimensions
                .values()
                .map(|e| e.name.as_str())
                .collect(),
        };

        let mut lists: Vec<WeightedList<String>> = Vec::new();
        let mut reasons: Vec<String> = Vec::new();
        for name in selected {
            let link = link_name(name);
            let weight = self
                .state
                .dimensions
                .get(&link)
                .with_context(|| format!("no dimension named {link:?}"))?
                .weight;
            match self.corpus(Some(name))?.similar(card, keep_all)? {
                QueryOutcome::Ranked(entries) => lists.push(WeightedList { weight, entries }),
                QueryOutcome::Unavailable(reason) => reasons.push(reason),
            }
        }
        if lists.is_empty() {
            return Ok(QueryOutcome::Unavailable(reasons.join("; ")));
        }
        let fused = fusion::combine(&lists);
        Ok(self.truncate(QueryOutcome::Ranked(fused), keep_all))
    }

    // max_results of 0 means unlimited
    fn truncate(&self, outcome: QueryOutcome, keep_all: bool) -> QueryOutcome {
        match outcome {
            QueryOutcome::Ranked(mut entries) if !keep_all && self.state.max_results > 0 => {
                entries.truncate(self.state.max_results);
                QueryOutcome::Ranked(entries)
            }
            other => other,
        }
    }
}

/// Relationship sink backed by the relationships dimension. The source is
/// recorded lazily on the first absorbed row, so a run without any
/// relationship tokens leaves no trace.
///
/// The relationships database lives apart from the driving dimension's,
/// so its writes cannot share the dimension's per-row transaction. The
/// sink instead persists a watermark (driving dimension -> origin and
/// last absorbed row) in the same transaction as its occurrences; a
/// resumed run that replays its last row finds the watermark and skips it.
struct DimensionSink {
    corpus: Corpus,
    driver: String,
    source_id: Option<i64>,
    watermark: Option<u64>,
    rows: u64,
}

const KEY_ABSORBED: &str = "absorbed";

type Watermarks = BTreeMap<String, (String, u64)>;

fn load_watermarks(conn: &Connection) -> Result<Watermarks> {
    match queries::get_state(conn, KEY_ABSORBED)? {
        Some(json) => serde_json::from_str(&json).context("Corrupt absorption watermark"),
        None => Ok(Watermarks::new()),
    }
}

impl DimensionSink {
    fn new(corpus: Corpus, driver: String) -> Self {
        Self {
            corpus,
            driver,
            source_id: None,
            watermark: None,
            rows: 0,
        }
    }
}

impl RelationshipSink for DimensionSink {
    fn absorb(
        &mut self,
        origin: &str,
        row_cap: Option<u64>,
        row: u64,
        card: &str,
        tokens: &[(String, String, i64)],
    ) -> Result<()> {
        let watermark = match self.watermark {
            Some(mark) => mark,
            None => {
                let mark = match load_watermarks(self.corpus.conn())?.get(&self.driver) {
                    Some((marked_origin, mark)) if marked_origin == origin => *mark,
                    _ => 0,
                };
                self.watermark = Some(mark);
                mark
            }
        };
        if row <= watermark {
            // absorbed before the driving run was interrupted
            return Ok(());
        }

        let source_id = match self.source_id {
            Some(id) => id,
            None => {
                let id = queries::record_source(self.corpus.conn(), origin, row_cap)?;
                self.source_id = Some(id);
                id
            }
        };
        let card_id = queries::get_or_create_card(self.corpus.conn(), card)?;
        let mut batch = Vec::with_capacity(tokens.len());
        for (tag, token, freq) in tokens {
            let attribute_id = queries::get_or_create_attribute(self.corpus.conn(), tag)?;
            let token_id = queries::get_or_create_token(self.corpus.conn(), token)?;
            batch.push(OccurrenceRow {
                source_id,
                card_id,
                attribute_id,
                token_id,
                freq: *freq,
            });
        }

        let mut marks = load_watermarks(self.corpus.conn())?;
        marks.insert(self.driver.clone(), (origin.to_string(), row));
        let json = serde_json::to_string(&marks)?;
        let tx = self.corpus.conn().unchecked_transaction()?;
        queries::append_occurrences(&tx, &batch)?;
        queries::set_state(&tx, KEY_ABSORBED, &json)?;
        tx.commit()?;

        self.watermark = Some(row);
        self.rows += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        // the driving run is done, so its watermark must not linger into
        // the next ingestion of the same file
        let mut marks = load_watermarks(self.corpus.conn())?;
        if marks.remove(&self.driver).is_some() {
            let json = serde_json::to_string(&marks)?;
            queries::set_state(self.corpus.conn(), KEY_ABSORBED, &json)?;
        }
        self.watermark = None;
        if self.source_id.is_none() {
            return Ok(());
        }
        let mut stats = self.corpus.stats()?;
        stats.num_docs += self.rows;
        stats.save(self.corpus.conn())?;
        let vocab_size = self.corpus.build_vocabulary()?;
        self.corpus.train(None)?;
        info!(
            rows = self.rows,
            vocab_size, "relationships dimension refreshed"
        );
        Ok(())
    }
}
