// Persisted per-model similarity index. Vectors live in the
// model_vectors table as JSON sparse pairs; a query loads the whole
// index and scans it with cosine similarity, which is plenty at the
// corpus sizes this serves.

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::db::queries;
use crate::model::kind::ModelKind;
use crate::model::SparseVec;

pub struct SimilarityIndex {
    vectors: Vec<(i64, SparseVec)>,
}

impl SimilarityIndex {
    /// Replace the stored index for `kind` with `vectors`. Entries must
    /// be sorted by vocab index within each vector.
    pub fn save(conn: &Connection, kind: ModelKind, vectors: &[(i64, SparseVec)]) -> Result<()> {
        let mut rows = Vec::with_capacity(vectors.len());
        for (card_id, vec) in vectors {
            let json = serde_json::to_string(vec)
                .with_context(|| format!("serializing {kind} vector for card {card_id}"))?;
            rows.push((*card_id, json));
        }
        queries::save_model_vectors(conn, kind.as_str(), &rows)
    }

    /// Load the stored index for `kind`, or None when it was never built.
    pub fn load(conn: &Connection, kind: ModelKind) -> Result<Option<Self>> {
        let rows = queries::load_model_vectors(conn, kind.as_str())?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut vectors = Vec::with_capacity(rows.len());
        for (card_id, json) in rows {
            let vec: SparseVec = serde_json::from_str(&json)
                .with_context(|| format!("decoding {kind} vector for card {card_id}"))?;
            vectors.push((card_id, vec));
        }
        Ok(Some(Self { vectors }))
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn vector(&self, card_id: i64) -> Option<&SparseVec> {
        self.vectors
            .iter()
            .find(|(id, _)| *id == card_id)
            .map(|(_, v)| v)
    }

    /// Cosine similarity of `card_id` against every other indexed card.
    /// None when the card has no vector in this index.
    pub fn query(&self, card_id: i64) -> Option<Vec<(i64, f64)>> {
        let anchor = self.vector(card_id)?;
        let scores = self
            .vectors
            .iter()
            .filter(|(id, _)| *id != card_id)
            .map(|(id, v)| (*id, cosine(anchor, v)))
            .collect();
        Some(scores)
    }
}

/// Sparse cosine over index-sorted vectors.
fn cosine(a: &SparseVec, b: &SparseVec) -> f64 {
    let mut dot = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    let na: f64 = a.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
