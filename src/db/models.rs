// Row structs shared between the queries module and the rest of the crate.

/// One ingestion invocation, recorded for lineage.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: i64,
    pub origin: String,
    pub row_cap: Option<u64>,
    pub date: String,
}

/// One occurrence batch entry: everything needed to append the detail log
/// and accumulate the aggregate frequency for a (card, token) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceRow {
    pub source_id: i64,
    pub card_id: i64,
    pub attribute_id: i64,
    pub token_id: i64,
    pub freq: i64,
}

/// One bag-of-tokens component for a card in the filtered corpus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BowEntry {
    pub vocab_index: usize,
    pub freq: i64,
}
