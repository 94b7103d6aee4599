// A corpus: one SQLite database holding the card/attribute/token
// registries, the occurrence log, the vocabulary, and the model indexes,
// plus the persisted settings that govern them. A project owns one corpus
// in single mode or one per dimension in dimensioned mode.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::{self, queries};
use crate::fusion::{self, QueryOutcome, Ranked, WeightedList};
use crate::model::{self, TrainOutcome};
use crate::model::index::SimilarityIndex;
use crate::model::kind::ModelKind;
use crate::settings::{CorpusSettings, CorpusStats, IngestCheckpoint};
use crate::text::link_name;
use crate::vocab;

/// Where relationship tokens extracted during ingestion go. In
/// dimensioned mode the project injects a sink backed by the reserved
/// relationships dimension; without one they stay in the ingesting
/// corpus.
pub trait RelationshipSink {
    /// Absorb one row's relationship tokens for `card`, keyed by tag.
    /// `row` is the 1-based position of the row within `origin`; the sink
    /// may see the same row again after an interrupted run resumes and
    /// must absorb it at most once.
    fn absorb(
        &mut self,
        origin: &str,
        row_cap: Option<u64>,
        row: u64,
        card: &str,
        tokens: &[(String, String, i64)],
    ) -> Result<()>;

    /// Called once when the driving ingest run finalizes.
    fn finalize(&mut self) -> Result<()>;
}

pub struct Corpus {
    pub name: String,
    pub link: String,
    path: PathBuf,
    conn: Connection,
    pub settings: CorpusSettings,
    /// Derived-only corpora (the relationships dimension) refuse direct
    /// file ingestion.
    pub accepts_direct_ingest: bool,
}

impl Corpus {
    /// Open (creating if needed) the corpus named `name` under `dir`.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        let link = link_name(name);
        let path = dir.join(format!("{link}.db"));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create corpus directory {}", dir.display()))?;
        let conn = db::open(&path)?;
        let settings = CorpusSettings::load(&conn)?;
        debug!(corpus = %link, path = %path.display(), "corpus opened");
        Ok(Self {
            name: name.to_string(),
            link,
            path,
            conn,
            settings,
            accepts_direct_ingest: true,
        })
    }

    /// In-memory corpus for tests and dry runs.
    pub fn open_in_memory(name: &str) -> Result<Self> {
        let conn = db::open_in_memory()?;
        let settings = CorpusSettings::load(&conn)?;
        Ok(Self {
            name: name.to_string(),
            link: link_name(name),
            path: PathBuf::from(":memory:"),
            conn,
            settings,
            accepts_direct_ingest: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mutate the settings aggregate and persist it.
    pub fn update_settings<F>(&mut self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut CorpusSettings),
    {
        apply(&mut self.settings);
        self.settings.save(&self.conn)
    }

    pub fn stats(&self) -> Result<CorpusStats> {
        CorpusStats::load(&self.conn)
    }

    pub fn pending_checkpoint(&self) -> Result<Option<IngestCheckpoint>> {
        IngestCheckpoint::load(&self.conn)
    }

    pub fn cards(&self) -> Result<Vec<String>> {
        queries::cards(&self.conn)
    }

    pub fn vocabulary_size(&self) -> Result<i64> {
        queries::vocabulary_size(&self.conn)
    }

    pub fn sources(&self) -> Result<Vec<crate::db::models::SourceRecord>> {
        queries::sources(&self.conn)
    }

    /// Whether each configured model has a built index.
    pub fn model_status(&self) -> Result<Vec<(ModelKind, bool)>> {
        let mut out = Vec::new();
        for kind in self.settings.models.keys() {
            out.push((*kind, queries::has_model_vectors(&self.conn, kind.as_str())?));
        }
        Ok(out)
    }

    /// Rebuild the vocabulary and filtered corpus from the aggregated
    /// frequencies, refreshing every statistic along the way.
    pub fn build_vocabulary(&self) -> Result<i64> {
        let built = vocab::build(
            &self.conn,
            self.settings.no_below,
            self.settings.no_above,
            self.settings.keep_n,
        )?;
        let mut stats = self.stats()?;
        stats.num_attributes = queries::attribute_count(&self.conn)?;
        stats.num_cards = queries::card_count(&self.conn)?;
        stats.num_words = queries::word_count(&self.conn)?;
        stats.full = built.full;
        stats.filtered = built.filtered;
        stats.save(&self.conn)?;
        Ok(built.vocab_size)
    }

    /// Train the configured models (or the subset in `only`) over the
    /// filtered corpus.
    pub fn train(&self, only: Option<&[ModelKind]>) -> Result<Vec<TrainOutcome>> {
        model::train(&self.conn, &self.settings, only)
    }

    /// Rebuild the aggregated frequencies from the occurrence log.
    pub fn rebuild_frequencies(&self) -> Result<()> {
        queries::rebuild_frequencies(&self.conn)?;
        info!(corpus = %self.link, "frequencies rebuilt from the occurrence log");
        Ok(())
    }

    /// Rank the cards most similar to `card` by fusing every model that
    /// has a built index. `keep_all` (test mode) bypasses the per-model
    /// score thresholds.
    pub fn similar(&self, card: &str, keep_all: bool) -> Result<QueryOutcome> {
        let link = link_name(card);
        let card_id = match queries::card_id(&self.conn, &link)? {
            Some(id) => id,
            None => {
                return Ok(QueryOutcome::Unavailable(format!(
                    "card {link:?} is not in corpus {:?}",
                    self.link
                )))
            }
        };
        if queries::vocabulary_size(&self.conn)? == 0 {
            return Ok(QueryOutcome::Unavailable(format!(
                "corpus {:?} has no vocabulary built",
                self.link
            )));
        }

        let mut lists: Vec<WeightedList<i64>> = Vec::new();
        for (kind, params) in self.settings.models.iter() {
            let index = match SimilarityIndex::load(&self.conn, *kind)? {
                Some(index) => index,
                None => continue,
            };
            let raw = match index.query(card_id) {
                Some(raw) => raw,
                None => continue,
            };
            lists.push(WeightedList {
                weight: params.weight,
                entries: fusion::rank_scores(&raw, params.min_similarity, keep_all),
            });
        }
        if lists.is_empty() {
            return Ok(QueryOutcome::Unavailable(format!(
                "corpus {:?} has no model index built",
                self.link
            )));
        }

        let fused = fusion::combine(&lists);
        let mut named = Vec::with_capacity(fused.len());
        for entry in fused {
            let name = queries::card_name(&self.conn, entry.key)?
                .with_context(|| format!("card id {} missing from the registry", entry.key))?;
            named.push(Ranked {
                key: name,
                score: entry.score,
                rank: entry.rank,
            });
        }
        Ok(QueryOutcome::Ranked(named))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_card_is_unavailable() {
        let corpus = Corpus::open_in_memory("Companies").unwrap();
        match corpus.similar("ghost", false).unwrap() {
            QueryOutcome::Unavailable(reason) => assert!(reason.contains("ghost")),
            other => panic!("expected unavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_query_without_vocabulary_is_unavailable() {
        let corpus = Corpus::open_in_memory("Companies").unwrap();
        queries::get_or_create_card(corpus.conn(), "acme").unwrap();
        match corpus.similar("Acme", false).unwrap() {
            QueryOutcome::Unavailable(reason) => assert!(reason.contains("vocabulary")),
            other => panic!("expected unavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_settings_update_persists() {
        let mut corpus = Corpus::open_in_memory("Companies").unwrap();
        corpus.update_settings(|s| s.no_below = 1).unwrap();
        assert_eq!(CorpusSettings::load(corpus.conn()).unwrap().no_below, 1);
    }
}
