// Vocabulary builder: filters the aggregated token frequencies by
// document frequency and materializes the filtered corpus the models
// train on. Rebuilding is destructive and idempotent: the previous
// vocabulary and filtered corpus are dropped first, and dense vocab
// indices are reassigned from scratch.

use anyhow::Result;
use rusqlite::{params, Connection};
use tracing::info;

use crate::settings::TokenStats;

pub struct VocabBuild {
    pub full: TokenStats,
    pub filtered: TokenStats,
    pub vocab_size: i64,
}

/// Rebuild the vocabulary: keep tokens whose document frequency lies in
/// `no_below ..= floor(num_cards * no_above)`, cap at `keep_n` keeping the
/// highest document frequencies (ties broken by token text), then
/// materialize the filtered corpus. Returns the token statistics computed
/// before and after the filter.
pub fn build(conn: &Connection, no_below: i64, no_above: f64, keep_n: i64) -> Result<VocabBuild> {
    let num_cards: i64 = conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;
    let max_docs = (num_cards as f64 * no_above).floor() as i64;

    let full = token_stats(
        conn,
        "SELECT token_id, COUNT(card_id) AS df FROM frequencies GROUP BY token_id",
        "SELECT card_id, COUNT(token_id) AS n FROM frequencies GROUP BY card_id",
    )?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM vocabulary", [])?;
    tx.execute("DELETE FROM filtered_corpus", [])?;
    tx.execute(
        "INSERT INTO vocabulary (token_id, token, doc_freq, vocab_index)
         SELECT f.token_id, t.text, COUNT(f.card_id) AS df, NULL
         FROM frequencies f
         JOIN tokens t ON t.id = f.token_id
         GROUP BY f.token_id, t.text
         HAVING COUNT(f.card_id) >= ?1 AND COUNT(f.card_id) <= ?2
         ORDER BY df DESC, t.text ASC
         LIMIT ?3",
        params![no_below, max_docs, keep_n],
    )?;
    // The table was emptied above, so fresh rowids start at 1 and follow
    // the insertion order, which is the keep order.
    tx.execute("UPDATE vocabulary SET vocab_index = rowid - 1", [])?;
    tx.execute(
        "INSERT INTO filtered_corpus (card_id, vocab_index, card, token, freq)
         SELECT f.card_id, v.vocab_index, c.name, v.token, f.freq
         FROM vocabulary v
         JOIN frequencies f ON f.token_id = v.token_id
         JOIN cards c ON c.id = f.card_id",
        [],
    )?;
    tx.commit()?;

    let filtered = token_stats(
        conn,
        "SELECT token_id, doc_freq AS df FROM vocabulary",
        "SELECT card_id, COUNT(vocab_index) AS n FROM filtered_corpus GROUP BY card_id",
    )?;

    let vocab_size: i64 = conn.query_row("SELECT COUNT(*) FROM vocabulary", [], |row| row.get(0))?;
    info!(
        vocab_size,
        kept_min = no_below,
        kept_max = max_docs,
        "vocabulary rebuilt"
    );
    Ok(VocabBuild {
        full,
        filtered,
        vocab_size,
    })
}

/// Token-distribution statistics over one view of the corpus.
/// `df_sql` yields (token_id, doc_freq) rows, `per_card_sql` yields
/// (card_id, token_count) rows.
fn token_stats(conn: &Connection, df_sql: &str, per_card_sql: &str) -> Result<TokenStats> {
    let (num_tokens, doc_freq_min, doc_freq_max): (i64, Option<i64>, Option<i64>) =
        conn.query_row(
            &format!("SELECT COUNT(*), MIN(df), MAX(df) FROM ({df_sql})"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

    let (cards_with_tokens, per_min, per_max, mean): (i64, Option<i64>, Option<i64>, Option<f64>) =
        conn.query_row(
            &format!("SELECT COUNT(*), MIN(n), MAX(n), AVG(n) FROM ({per_card_sql})"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
    let mean = mean.unwrap_or(0.0);

    // Population variance as a second pass around the mean; undefined or
    // zero variance reads as None rather than 0.0.
    let stdev = if cards_with_tokens < 2 {
        None
    } else {
        let variance: f64 = conn.query_row(
            &format!("SELECT AVG((n - ?1) * (n - ?1)) FROM ({per_card_sql})"),
            params![mean],
            |row| row.get(0),
        )?;
        (variance > 0.0).then(|| variance.sqrt())
    };

    Ok(TokenStats {
        num_tokens,
        doc_freq_min: doc_freq_min.unwrap_or(0),
        doc_freq_max: doc_freq_max.unwrap_or(0),
        cards_with_tokens,
        tokens_per_card_min: per_min.unwrap_or(0),
        tokens_per_card_max: per_max.unwrap_or(0),
        tokens_per_card_mean: mean,
        tokens_per_card_stdev: stdev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::OccurrenceRow;
    use crate::db::{open_in_memory, queries};

    /// Load (card, token, freq) rows for each card's tokens.
    fn seed(conn: &Connection, rows: &[(&str, &str, i64)]) {
        let source = queries::record_source(conn, "test.csv", None).unwrap();
        let attr = queries::get_or_create_attribute(conn, "word").unwrap();
        for (card, token, freq) in rows {
            let card_id = queries::get_or_create_card(conn, card).unwrap();
            let token_id = queries::get_or_create_token(conn, token).unwrap();
            queries::record_occurrences(
                conn,
                &[OccurrenceRow {
                    source_id: source,
                    card_id,
                    attribute_id: attr,
                    token_id,
                    freq: *freq,
                }],
            )
            .unwrap();
        }
    }

    #[test]
    fn test_filter_by_doc_freq_band() {
        let conn = open_in_memory().unwrap();
        // "rare" appears in 1 card, "mid" in 2, "common" in all 4
        seed(
            &conn,
            &[
                ("a", "attr_rare", 1),
                ("a", "attr_mid", 1),
                ("b", "attr_mid", 1),
                ("a", "attr_common", 1),
                ("b", "attr_common", 1),
                ("c", "attr_common", 1),
                ("d", "attr_common", 1),
            ],
        );
        // band: df >= 2 and df <= floor(4 * 0.6) = 2 → only "mid" survives
        let built = build(&conn, 2, 0.6, 100).unwrap();
        assert_eq!(built.vocab_size, 1);
        let kept: String = conn
            .query_row("SELECT token FROM vocabulary", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, "attr_mid");

        // filtered corpus holds one row per (card, surviving token)
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM filtered_corpus", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_keep_n_cap_is_deterministic() {
        let conn = open_in_memory().unwrap();
        seed(
            &conn,
            &[
                ("a", "attr_x", 1),
                ("b", "attr_x", 1),
                ("a", "attr_b", 1),
                ("b", "attr_b", 1),
                ("a", "attr_a", 1),
            ],
        );
        // all three pass the band (df 1..=2); cap at 2 keeps the two
        // highest doc freqs, tie between x and b broken by token text
        let built = build(&conn, 1, 1.0, 2).unwrap();
        assert_eq!(built.vocab_size, 2);
        let mut stmt = conn
            .prepare("SELECT token FROM vocabulary ORDER BY vocab_index")
            .unwrap();
        let kept: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(kept, vec!["attr_b", "attr_x"]);
    }

    #[test]
    fn test_rebuild_replaces_previous_vocabulary() {
        let conn = open_in_memory().unwrap();
        seed(&conn, &[("a", "attr_x", 1), ("b", "attr_x", 1), ("a", "attr_y", 1)]);
        assert_eq!(build(&conn, 1, 1.0, 100).unwrap().vocab_size, 2);
        // tighter band drops the singleton; indices are dense again
        let built = build(&conn, 2, 1.0, 100).unwrap();
        assert_eq!(built.vocab_size, 1);
        let idx: i64 = conn
            .query_row("SELECT vocab_index FROM vocabulary", [], |row| row.get(0))
            .unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_empty_corpus_yields_zeroed_stats() {
        let conn = open_in_memory().unwrap();
        let built = build(&conn, 5, 0.8, 100).unwrap();
        assert_eq!(built.vocab_size, 0);
        assert_eq!(built.full.num_tokens, 0);
        assert_eq!(built.full.doc_freq_min, 0);
        assert_eq!(built.full.tokens_per_card_mean, 0.0);
        assert_eq!(built.full.tokens_per_card_stdev, None);
        assert_eq!(built.filtered.cards_with_tokens, 0);
    }

    #[test]
    fn test_stats_mean_and_stdev() {
        let conn = open_in_memory().unwrap();
        // card a has 3 tokens, card b has 1
        seed(
            &conn,
            &[
                ("a", "attr_p", 1),
                ("a", "attr_q", 1),
                ("a", "attr_r", 1),
                ("b", "attr_p", 1),
            ],
        );
        let built = build(&conn, 1, 1.0, 100).unwrap();
        assert_eq!(built.full.cards_with_tokens, 2);
        assert_eq!(built.full.tokens_per_card_min, 1);
        assert_eq!(built.full.tokens_per_card_max, 3);
        assert!((built.full.tokens_per_card_mean - 2.0).abs() < 1e-9);
        // population stdev of [3, 1] is 1.0
        assert!((built.full.tokens_per_card_stdev.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_counts_have_no_stdev() {
        let conn = open_in_memory().unwrap();
        seed(&conn, &[("a", "attr_p", 1), ("b", "attr_q", 1)]);
        let built = build(&conn, 1, 1.0, 100).unwrap();
        assert_eq!(built.full.tokens_per_card_stdev, None);
    }
}
