// The ingestion pipeline: stream a delimited file row by row into the
// registries and the occurrence log, checkpointing after every committed
// row so an interrupted run resumes where it stopped, then finalize by
// rebuilding the vocabulary and retraining the models.

use std::path::Path;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::corpus::{Corpus, RelationshipSink};
use crate::db::models::OccurrenceRow;
use crate::db::queries;
use crate::ingest::reader::DelimitedReader;
use crate::ingest::tokenize::Tokenizer;
use crate::settings::IngestCheckpoint;

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub separator: char,
    pub row_cap: Option<u64>,
    /// Plain values are whole tokens already rather than composing with
    /// their column name.
    pub pre_tokenized: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            separator: ';',
            row_cap: None,
            pre_tokenized: false,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum IngestOutcome {
    Completed { rows: u64, resumed: bool },
    Refused(String),
}

/// Ingest a source file into `corpus`. With a pending checkpoint the
/// checkpointed run resumes first, under its recorded options; a fresh
/// file is only accepted once the store is clean. Relationship tokens go
/// to `sink` when one is injected, otherwise they stay on the row's own
/// card under their tag.
pub fn ingest(
    corpus: &mut Corpus,
    mut sink: Option<&mut dyn RelationshipSink>,
    file: Option<&Path>,
    opts: &IngestOptions,
) -> Result<IngestOutcome> {
    if !corpus.accepts_direct_ingest {
        return Ok(IngestOutcome::Refused(format!(
            "corpus {:?} is derived from relationship tokens and cannot be ingested directly",
            corpus.link
        )));
    }

    let pending = corpus.pending_checkpoint()?;
    let resumed = pending.is_some();
    let mut checkpoint = match pending {
        Some(cp) => {
            if let Some(path) = file {
                if path.to_string_lossy() != cp.source_path {
                    warn!(
                        pending = %cp.source_path,
                        given = %path.display(),
                        "a checkpointed run is pending; resuming it before anything else"
                    );
                }
            }
            info!(
                source = %cp.source_path,
                rows_done = cp.rows_consumed,
                "resuming interrupted ingestion"
            );
            cp
        }
        None => {
            let Some(path) = file else {
                return Ok(IngestOutcome::Refused(
                    "no source file given and no interrupted run to resume".to_string(),
                ));
            };
            let origin = path.to_string_lossy().to_string();
            let header = DelimitedReader::open(path, opts.separator, 0, opts.row_cap)?
                .header()
                .to_vec();
            let source_id = queries::record_source(corpus.conn(), &origin, opts.row_cap)?;
            let cp = IngestCheckpoint {
                source_path: origin,
                separator: opts.separator,
                row_cap: opts.row_cap,
                rows_consumed: 0,
                source_id,
                pre_tokenized: opts.pre_tokenized,
                card_attribute: header[0].clone(),
            };
            cp.save(corpus.conn())?;
            cp
        }
    };

    let mut reader = DelimitedReader::open(
        Path::new(&checkpoint.source_path),
        checkpoint.separator,
        checkpoint.rows_consumed,
        checkpoint.row_cap,
    )?;
    if reader.header().first() != Some(&checkpoint.card_attribute) {
        bail!(
            "source file {:?} changed since the run started: identity column is no longer {:?}",
            checkpoint.source_path,
            checkpoint.card_attribute
        );
    }
    let header = reader.header().to_vec();
    let attr_ids = queries::register_attributes(corpus.conn(), &header[1..])?;
    let tokenizer = Tokenizer::new(&corpus.settings, checkpoint.pre_tokenized)?;

    while let Some(fields) = reader.next_row()? {
        let row = tokenizer.tokenize_row(&header, &fields)?;
        let card_id = queries::get_or_create_card(corpus.conn(), &row.card)?;

        let mut batch = Vec::with_capacity(row.direct.len());
        for ((attr, token), freq) in &row.direct {
            let token_id = queries::get_or_create_token(corpus.conn(), token)?;
            batch.push(OccurrenceRow {
                source_id: checkpoint.source_id,
                card_id,
                attribute_id: attr_ids[attr],
                token_id,
                freq: *freq,
            });
        }

        if !row.relationship.is_empty() {
            match &mut sink {
                Some(sink) => {
                    let tokens: Vec<(String, String, i64)> = row
                        .relationship
                        .iter()
                        .map(|((tag, token), freq)| (tag.clone(), token.clone(), *freq))
                        .collect();
                    sink.absorb(
                        &checkpoint.source_path,
                        checkpoint.row_cap,
                        checkpoint.rows_consumed + 1,
                        &row.card,
                        &tokens,
                    )?;
                }
                None => {
                    for ((tag, token), freq) in &row.relationship {
                        let attribute_id = queries::get_or_create_attribute(corpus.conn(), tag)?;
                        let token_id = queries::get_or_create_token(corpus.conn(), token)?;
                        batch.push(OccurrenceRow {
                            source_id: checkpoint.source_id,
                            card_id,
                            attribute_id,
                            token_id,
                            freq: *freq,
                        });
                    }
                }
            }
        }

        // the batch and the advanced checkpoint commit together, so a
        // resumed run never replays a row that already reached the log
        let tx = corpus.conn().unchecked_transaction()?;
        queries::append_occurrences(&tx, &batch)?;
        checkpoint.rows_consumed += 1;
        checkpoint.save(&tx)?;
        tx.commit()?;
    }

    let rows = checkpoint.rows_consumed;
    IngestCheckpoint::clear(corpus.conn())?;
    let mut stats = corpus.stats()?;
    stats.num_docs += rows;
    stats.save(corpus.conn())?;

    let vocab_size = corpus.build_vocabulary()?;
    let outcomes = corpus.train(None)?;
    info!(
        corpus = %corpus.link,
        rows,
        vocab_size,
        models = outcomes.len(),
        "ingestion finalized"
    );

    if let Some(sink) = sink {
        sink.finalize()?;
    }
    Ok(IngestOutcome::Completed { rows, resumed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn test_corpus() -> Corpus {
        let mut corpus = Corpus::open_in_memory("Test").unwrap();
        corpus
            .update_settings(|s| {
                s.no_below = 1;
                s.no_above = 1.0;
            })
            .unwrap();
        corpus
    }

    fn frequencies(corpus: &Corpus) -> Vec<(String, String, i64)> {
        let mut stmt = corpus
            .conn()
            .prepare(
                "SELECT c.name, t.text, f.freq
                 FROM frequencies f
                 JOIN cards c ON c.id = f.card_id
                 JOIN tokens t ON t.id = f.token_id
                 ORDER BY c.name, t.text",
            )
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_split_ingestion_matches_single_pass() {
        let header = "name;city;word\n";
        let first = "A;lisboa;apple fruit\nB;porto;apple banana\n";
        let second = "C;porto;car engine\nA;braga;fresh apple\n";

        let full = temp_csv(&format!("{header}{first}{second}"));
        let mut one_pass = test_corpus();
        ingest(&mut one_pass, None, Some(full.path()), &IngestOptions::default()).unwrap();

        let half_a = temp_csv(&format!("{header}{first}"));
        let half_b = temp_csv(&format!("{header}{second}"));
        let mut two_pass = test_corpus();
        ingest(&mut two_pass, None, Some(half_a.path()), &IngestOptions::default()).unwrap();
        ingest(&mut two_pass, None, Some(half_b.path()), &IngestOptions::default()).unwrap();

        assert_eq!(frequencies(&one_pass), frequencies(&two_pass));
        assert_eq!(
            one_pass.stats().unwrap().num_docs,
            two_pass.stats().unwrap().num_docs
        );
    }

    #[test]
    fn test_resume_skips_already_committed_rows() {
        let file = temp_csv("name;city\nA;w\nB;x\nC;y\nD;z\n");
        let mut corpus = test_corpus();

        // forge a checkpoint claiming the first two rows are committed
        let source_id =
            queries::record_source(corpus.conn(), &file.path().to_string_lossy(), None).unwrap();
        IngestCheckpoint {
            source_path: file.path().to_string_lossy().to_string(),
            separator: ';',
            row_cap: None,
            rows_consumed: 2,
            source_id,
            pre_tokenized: false,
            card_attribute: "name".to_string(),
        }
        .save(corpus.conn())
        .unwrap();

        let outcome = ingest(&mut corpus, None, None, &IngestOptions::default()).unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Completed {
                rows: 4,
                resumed: true
            }
        );
        // only the rows past the checkpoint were ingested
        assert_eq!(corpus.cards().unwrap(), vec!["c", "d"]);
        assert!(corpus.pending_checkpoint().unwrap().is_none());
    }

    #[test]
    fn test_pending_run_resumes_even_when_another_file_is_given() {
        let pending = temp_csv("name;city\nA;x\nB;y\n");
        let other = temp_csv("name;city\nZ;q\n");
        let mut corpus = test_corpus();

        let source_id =
            queries::record_source(corpus.conn(), &pending.path().to_string_lossy(), None).unwrap();
        IngestCheckpoint {
            source_path: pending.path().to_string_lossy().to_string(),
            separator: ';',
            row_cap: None,
            rows_consumed: 0,
            source_id,
            pre_tokenized: false,
            card_attribute: "name".to_string(),
        }
        .save(corpus.conn())
        .unwrap();

        ingest(&mut corpus, None, Some(other.path()), &IngestOptions::default()).unwrap();
        assert_eq!(corpus.cards().unwrap(), vec!["a", "b"]);
    }

    struct FlakySink {
        fail_on_row: u64,
        absorbed: Vec<u64>,
    }

    impl RelationshipSink for FlakySink {
        fn absorb(
            &mut self,
            _origin: &str,
            _row_cap: Option<u64>,
            row: u64,
            _card: &str,
            _tokens: &[(String, String, i64)],
        ) -> Result<()> {
            if row == self.fail_on_row {
                bail!("sink offline");
            }
            self.absorbed.push(row);
            Ok(())
        }

        fn finalize(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_interrupted_row_leaves_log_and_checkpoint_aligned() {
        let file = temp_csv("name;owner_cpf\nA;111\nB;222\nC;333\n");
        let mut corpus = test_corpus();

        let mut flaky = FlakySink {
            fail_on_row: 2,
            absorbed: Vec::new(),
        };
        assert!(ingest(
            &mut corpus,
            Some(&mut flaky),
            Some(file.path()),
            &IngestOptions::default()
        )
        .is_err());

        // the failed row reached neither the log nor the checkpoint
        assert_eq!(corpus.cards().unwrap(), vec!["a"]);
        let pending = corpus.pending_checkpoint().unwrap().unwrap();
        assert_eq!(pending.rows_consumed, 1);

        let mut steady = FlakySink {
            fail_on_row: 0,
            absorbed: Vec::new(),
        };
        let outcome = ingest(&mut corpus, Some(&mut steady), None, &IngestOptions::default());
        assert_eq!(
            outcome.unwrap(),
            IngestOutcome::Completed {
                rows: 3,
                resumed: true
            }
        );
        assert_eq!(steady.absorbed, vec![2, 3]);
        // no row was double counted across the two passes
        assert_eq!(
            frequencies(&corpus),
            vec![
                ("a".to_string(), "owner_cpf_111".to_string(), 1),
                ("b".to_string(), "owner_cpf_222".to_string(), 1),
                ("c".to_string(), "owner_cpf_333".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_derived_corpus_refuses_direct_ingest() {
        let file = temp_csv("name;city\nA;x\n");
        let mut corpus = test_corpus();
        corpus.accepts_direct_ingest = false;
        let outcome = ingest(&mut corpus, None, Some(file.path()), &IngestOptions::default()).unwrap();
        assert!(matches!(outcome, IngestOutcome::Refused(_)));
        assert!(corpus.cards().unwrap().is_empty());
    }
}
