//! # notes-rag
//!
//! Local-first retrieval-augmented answering over personal notes and
//! uploaded documents.
//!
//! Sources are chunked, embedded and stored per owner. A question is
//! embedded, matched against the owner's chunks by cosine similarity, gated
//! on relevance, and answered by the first willing stage of a fallback
//! chain: on-device model, hosted model, web summary, and finally a fixed
//! "nothing relevant found" reply.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────────┐
//! │ Source feed  │──▶│    Indexer       │──▶│ VectorStore  │
//! │ notes + docs │   │ chunk + embed    │   │ memory/SQLite│
//! └──────────────┘   └─────────────────┘   └──────┬───────┘
//!                                                 │ search
//!                    ┌─────────────────┐   ┌──────▼───────┐
//!   question ───────▶│   Assistant      │──▶│  Retrieval   │
//!                    │ ask_from_notes   │   │ gate+context │
//!                    └────────┬────────┘   └──────────────┘
//!                             ▼
//!             local ─▶ hosted ─▶ web ─▶ generic
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! notes-rag init
//! notes-rag index
//! notes-rag ask "What temperature do I bake bread at?"
//! notes-rag search "bread" --top-k 5
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Sources, chunks, answers |
//! | [`chunk`] | Paragraph-aware chunking with overlap |
//! | [`embedding`] | Embedder handle and backends |
//! | [`store`] | Vector store trait, in-memory and SQLite backends |
//! | [`search`] | Cosine similarity search |
//! | [`indexer`] | Full and incremental indexing runs |
//! | [`progress`] | Indexing progress on stderr |
//! | [`retrieve`] | Relevance gate, diversity, context, snippets |
//! | [`answer`] | Fallback chain and answer formatting |
//! | [`ask`] | Caller-facing question answering |
//! | [`sources`] | Filesystem source feed |
//! | [`config`] | TOML configuration |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema |
//! | [`error`] | Typed errors |

pub mod answer;
pub mod ask;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retrieve;
pub mod search;
pub mod sources;
pub mod store;
