// Ingestion: streaming reader, row tokenizer, and the checkpointed
// pipeline that drives them.

pub mod pipeline;
pub mod reader;
pub mod tokenize;

pub use pipeline::{ingest, IngestOptions, IngestOutcome};
