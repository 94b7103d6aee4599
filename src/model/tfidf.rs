// Tf-idf weighting over the filtered bag-of-tokens corpus.

use crate::db::models::BowEntry;
use crate::model::SparseVec;

/// Classic tf-idf: term frequency times log2(N / doc_freq), L2-normalized.
pub struct TfidfModel {
    idfs: Vec<f64>,
    num_docs: usize,
}

impl TfidfModel {
    /// Learn idf weights from every card's filtered bag. `vocab_size` is
    /// the dense vocabulary size, indices in the bags must be < it.
    pub fn fit(corpus: &[Vec<BowEntry>], vocab_size: usize) -> Self {
        let mut doc_freq = vec![0u64; vocab_size];
        for bow in corpus {
            for entry in bow {
                doc_freq[entry.vocab_index] += 1;
            }
        }
        let n = corpus.len() as f64;
        let idfs = doc_freq
            .iter()
            .map(|&df| if df == 0 { 0.0 } else { (n / df as f64).log2() })
            .collect();
        Self {
            idfs,
            num_docs: corpus.len(),
        }
    }

    pub fn num_docs(&self) -> usize {
        self.num_docs
    }

    /// Weight a bag and normalize to unit length. Terms whose idf is zero
    /// (present in every card) drop out of the vector.
    pub fn transform(&self, bow: &[BowEntry]) -> SparseVec {
        let mut vec: SparseVec = bow
            .iter()
            .filter_map(|e| {
                let w = e.freq as f64 * self.idfs[e.vocab_index];
                (w != 0.0).then_some((e.vocab_index, w))
            })
            .collect();
        let norm = vec.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut vec {
                *w /= norm;
            }
        }
        vec
    }
}

/// Tf-idf with pivoted length normalization instead of the cosine norm.
/// The weighted vector is divided by `(1 - slope) * pivot + slope * u`
/// where `u` is the number of unique terms in the card, so cards near the
/// pivot length keep their raw magnitude.
pub struct PivotedTfidfModel {
    inner_idfs: Vec<f64>,
    pivot: f64,
    slope: f64,
}

pub const DEFAULT_SLOPE: f64 = 0.65;

impl PivotedTfidfModel {
    pub fn fit(corpus: &[Vec<BowEntry>], vocab_size: usize, pivot: f64) -> Self {
        let base = TfidfModel::fit(corpus, vocab_size);
        Self {
            inner_idfs: base.idfs,
            pivot,
            slope: DEFAULT_SLOPE,
        }
    }

    pub fn transform(&self, bow: &[BowEntry]) -> SparseVec {
        let unique = bow.len() as f64;
        let norm = (1.0 - self.slope) * self.pivot + self.slope * unique;
        if norm <= 0.0 {
            return Vec::new();
        }
        bow.iter()
            .filter_map(|e| {
                let w = e.freq as f64 * self.inner_idfs[e.vocab_index] / norm;
                (w != 0.0).then_some((e.vocab_index, w))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bow(entries: &[(usize, i64)]) -> Vec<BowEntry> {
        entries
            .iter()
            .map(|&(vocab_index, freq)| BowEntry { vocab_index, freq })
            .collect()
    }

    #[test]
    fn test_shared_terms_get_zero_weight() {
        // term 0 appears in both docs, so idf = log2(2/2) = 0
        let corpus = vec![bow(&[(0, 3), (1, 1)]), bow(&[(0, 1)])];
        let model = TfidfModel::fit(&corpus, 2);
        let v = model.transform(&corpus[0]);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].0, 1);
    }

    #[test]
    fn test_transform_is_unit_length() {
        let corpus = vec![bow(&[(0, 2), (1, 5)]), bow(&[(2, 1)]), bow(&[(1, 1)])];
        let model = TfidfModel::fit(&corpus, 3);
        let v = model.transform(&corpus[0]);
        let norm: f64 = v.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_bag_transforms_to_empty_vector() {
        let corpus = vec![bow(&[(0, 1)]), bow(&[])];
        let model = TfidfModel::fit(&corpus, 1);
        assert!(model.transform(&corpus[1]).is_empty());
    }

    #[test]
    fn test_pivoted_norm_depends_on_unique_terms() {
        let corpus = vec![bow(&[(0, 1), (1, 1)]), bow(&[(2, 1)]), bow(&[(1, 2)])];
        let model = PivotedTfidfModel::fit(&corpus, 3, 1.0);
        let short = model.transform(&bow(&[(2, 1)]));
        let long = model.transform(&bow(&[(2, 1), (0, 1)]));
        // same term weight, but the longer card is normalized harder
        assert!(short[0].1 > long.iter().find(|(i, _)| *i == 2).unwrap().1);
    }
}
