// Rank fusion: turn raw similarity scores into ranked lists and combine
// ranked lists from several sources into one weighted consensus.
//
// The mechanics are identical at both levels (models inside a corpus,
// keyed by card id, and dimensions inside a project, keyed by card
// name), so the combiner is generic over the key.

use std::collections::BTreeMap;

use crate::text::round2;

/// One entry of a ranked similarity list. Scores are on the 0..100 scale,
/// rounded to two decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<K> {
    pub key: K,
    pub score: f64,
    pub rank: usize,
}

/// A ranked list with the weight it carries in fusion.
#[derive(Debug, Clone)]
pub struct WeightedList<K> {
    pub weight: f64,
    pub entries: Vec<Ranked<K>>,
}

/// What a similarity query produced: a ranked list, or an explanation of
/// which precondition kept the query from running.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Ranked(Vec<Ranked<String>>),
    Unavailable(String),
}

/// Rank one model's raw scores. Scores below `min_similarity` are dropped
/// unless `keep_all` (test mode) is set; survivors are scaled to 0..100,
/// rounded, and ranked best-first with ties broken by ascending key.
pub fn rank_scores<K: Ord + Clone>(
    raw: &[(K, f64)],
    min_similarity: f64,
    keep_all: bool,
) -> Vec<Ranked<K>> {
    let mut entries: Vec<(K, f64)> = raw
        .iter()
        .filter(|(_, score)| keep_all || *score >= min_similarity)
        .map(|(key, score)| (key.clone(), round2(score * 100.0)))
        .collect();
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (key, score))| Ranked {
            key,
            score,
            rank: i + 1,
        })
        .collect()
}

/// Fuse several weighted ranked lists into one. The union of keys is
/// taken; a source that lacks a key contributes score zero while its
/// weight still counts in the denominator, so consensus across sources
/// beats a single high score. The fused list is re-ranked best-first,
/// ties broken by ascending key.
pub fn combine<K: Ord + Clone>(lists: &[WeightedList<K>]) -> Vec<Ranked<K>> {
    let total_weight: f64 = lists.iter().map(|l| l.weight).sum();
    if total_weight <= 0.0 {
        return Vec::new();
    }
    let mut acc: BTreeMap<K, f64> = BTreeMap::new();
    for list in lists {
        for entry in &list.entries {
            *acc.entry(entry.key.clone()).or_insert(0.0) += entry.score * list.weight;
        }
    }
    let mut fused: Vec<(K, f64)> = acc
        .into_iter()
        .map(|(key, sum)| (key, round2(sum / total_weight)))
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
        .into_iter()
        .enumerate()
        .map(|(i, (key, score))| Ranked {
            key,
            score,
            rank: i + 1,
        })
        .collect()
}
