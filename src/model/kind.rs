// Model kinds and their per-model parameters.
//
// The original workflow kept per-model parameter dictionaries keyed by
// name; here the set of kinds is a closed enum and the parameters are an
// explicit typed record, so a persisted value can never inject an unknown
// field.

use serde::{Deserialize, Serialize};

/// The pluggable vector-model kinds the adapter knows how to build.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Log-idf weighting over the filtered bag-of-tokens corpus
    Tfidf,
    /// Tf-idf with pivoted length normalization
    TfidfPivot,
    /// Seeded sparse random projection of the tfidf vectors
    Topic,
}

impl ModelKind {
    pub fn all() -> &'static [ModelKind] {
        &[ModelKind::Tfidf, ModelKind::TfidfPivot, ModelKind::Topic]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Tfidf => "tfidf",
            ModelKind::TfidfPivot => "tfidf-pivot",
            ModelKind::Topic => "topic",
        }
    }

    pub fn parse(name: &str) -> Option<ModelKind> {
        match name {
            "tfidf" => Some(ModelKind::Tfidf),
            "tfidf-pivot" | "tfidf_pivot" => Some(ModelKind::TfidfPivot),
            "topic" => Some(ModelKind::Topic),
            _ => None,
        }
    }

    /// The model whose output this kind consumes, if any. Training checks
    /// this before building and refuses a dependent model whose
    /// prerequisite index is missing.
    pub fn requires(&self) -> Option<ModelKind> {
        match self {
            ModelKind::Topic => Some(ModelKind::Tfidf),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weight, threshold, and hyperparameters for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Relative weight in the cross-model fusion
    pub weight: f64,
    /// Raw similarity scores below this are dropped outside test mode
    pub min_similarity: f64,
    /// Output dimensionality, for kinds that project (None otherwise)
    pub num_topics: Option<usize>,
}

impl ModelParams {
    pub fn defaults_for(kind: ModelKind) -> Self {
        Self {
            weight: 1.0,
            min_similarity: 0.4,
            num_topics: match kind {
                ModelKind::Topic => Some(300),
                _ => None,
            },
        }
    }
}
