// Vector models over the filtered corpus and the persisted similarity
// indexes they produce.

pub mod index;
pub mod kind;
pub mod tfidf;
pub mod topic;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::queries;
use crate::model::index::SimilarityIndex;
use crate::model::kind::ModelKind;
use crate::model::tfidf::{PivotedTfidfModel, TfidfModel};
use crate::model::topic::TopicModel;
use crate::settings::CorpusSettings;

/// A vector as (dense vocab index, weight) pairs, sorted by index.
pub type SparseVec = Vec<(usize, f64)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No vocabulary has been built yet
    EmptyVocabulary,
    /// The named prerequisite model has no stored index
    MissingPrerequisite(ModelKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    Trained { kind: ModelKind, vectors: usize },
    Skipped { kind: ModelKind, reason: SkipReason },
}

impl TrainOutcome {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainOutcome::Trained { kind, .. } | TrainOutcome::Skipped { kind, .. } => *kind,
        }
    }
}

/// Train the configured models and persist their indexes. `only` narrows
/// the run to a subset of kinds; configured order already puts every
/// prerequisite before its dependent. A model whose precondition is not
/// met is reported as skipped, never raised.
pub fn train(
    conn: &Connection,
    settings: &CorpusSettings,
    only: Option<&[ModelKind]>,
) -> Result<Vec<TrainOutcome>> {
    let wanted = |kind: ModelKind| only.map_or(true, |ks| ks.contains(&kind));
    let vocab_size = queries::vocabulary_size(conn)? as usize;

    let mut outcomes = Vec::new();
    if vocab_size == 0 {
        for kind in settings.models.keys().copied().filter(|k| wanted(*k)) {
            outcomes.push(TrainOutcome::Skipped {
                kind,
                reason: SkipReason::EmptyVocabulary,
            });
        }
        return Ok(outcomes);
    }

    // Card ids are dense, so 0..count walks every card in vector order.
    let num_cards = queries::card_count(conn)?;
    let mut bows = Vec::with_capacity(num_cards as usize);
    for card_id in 0..num_cards {
        bows.push((card_id, queries::bow_for_card(conn, card_id)?));
    }
    let corpus: Vec<_> = bows.iter().map(|(_, b)| b.clone()).collect();

    for (kind, params) in settings.models.iter() {
        if !wanted(*kind) {
            continue;
        }
        if let Some(required) = kind.requires() {
            if !queries::has_model_vectors(conn, required.as_str())? {
                debug!(model = %kind, missing = %required, "prerequisite index not built, skipping");
                outcomes.push(TrainOutcome::Skipped {
                    kind: *kind,
                    reason: SkipReason::MissingPrerequisite(required),
                });
                continue;
            }
        }

        let vectors: Vec<(i64, SparseVec)> = match kind {
            ModelKind::Tfidf => {
                let model = TfidfModel::fit(&corpus, vocab_size);
                bows.iter()
                    .map(|(id, bow)| (*id, model.transform(bow)))
                    .collect()
            }
            ModelKind::TfidfPivot => {
                let pivot = vocab_size as f64 / corpus.len() as f64;
                let model = PivotedTfidfModel::fit(&corpus, vocab_size, pivot);
                bows.iter()
                    .map(|(id, bow)| (*id, model.transform(bow)))
                    .collect()
            }
            ModelKind::Topic => {
                let num_topics = params.num_topics.unwrap_or(300);
                let model = TopicModel::new(num_topics);
                let base = SimilarityIndex::load(conn, ModelKind::Tfidf)?
                    .ok_or_else(|| anyhow::anyhow!("tfidf index vanished during training"))?;
                bows.iter()
                    .map(|(id, _)| {
                        let tfidf_vec = base.vector(*id).cloned().unwrap_or_default();
                        (*id, model.transform(&tfidf_vec))
                    })
                    .collect()
            }
        };

        SimilarityIndex::save(conn, *kind, &vectors)?;
        info!(model = %kind, vectors = vectors.len(), "model trained");
        outcomes.push(TrainOutcome::Trained {
            kind: *kind,
            vectors: vectors.len(),
        });
    }

    Ok(outcomes)
}
