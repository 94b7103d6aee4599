// Cardsim: card-similarity corpora over SQLite.
//
// This is the library root. A project groups one or more corpora; each
// corpus ingests delimited files into token registries, filters a
// vocabulary, trains vector models, and answers ranked similarity
// queries fused across models (and, in dimensioned projects, across
// dimensions).

pub mod config;
pub mod corpus;
pub mod db;
pub mod fusion;
pub mod ingest;
pub mod model;
pub mod project;
pub mod settings;
pub mod text;
pub mod vocab;
