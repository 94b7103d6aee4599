// Topic model built as a seeded sparse random projection of the tfidf
// vectors. The projection matrix is never materialized; each input
// dimension's column is regenerated from a seed derived from the column
// index, so the mapping is stable across runs and across corpora of any
// size.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::SparseVec;

const PROJECTION_SEED: u64 = 0x7ca2_d5f1;

pub struct TopicModel {
    num_topics: usize,
}

impl TopicModel {
    pub fn new(num_topics: usize) -> Self {
        Self { num_topics }
    }

    /// Project one tfidf vector down to `num_topics` dimensions using
    /// Achlioptas-style columns: entries are +sqrt(3) or -sqrt(3) with
    /// probability 1/6 each, zero otherwise.
    pub fn transform(&self, tfidf: &SparseVec) -> SparseVec {
        let mut out = vec![0.0f64; self.num_topics];
        let scale = 3.0f64.sqrt();
        for &(dim, weight) in tfidf {
            let mut rng = StdRng::seed_from_u64(PROJECTION_SEED.wrapping_add(dim as u64));
            for slot in out.iter_mut() {
                match rng.random_range(0..6u8) {
                    0 => *slot += weight * scale,
                    1 => *slot -= weight * scale,
                    _ => {}
                }
            }
        }
        out.into_iter()
            .enumerate()
            .filter(|(_, w)| *w != 0.0)
            .collect()
    }
}
