//! # ainav — natural-language code navigation
//!
//! Local, incremental code indexing and hybrid (semantic + lexical +
//! symbol + route/intent) retrieval over a single repository at a time.
//! No remote repos, no distributed indexing, no write-back.
//!
//! The core pipeline is two halves:
//! - [`indexer::Indexer`] walks a repo, parses symbols with tree-sitter,
//!   builds chunks, optionally summarizes them with an LLM, embeds them,
//!   and upserts both the metadata store and the vector store.
//! - [`query::QueryEngine`] rewrites (optionally), embeds, searches,
//!   scores, reranks (optionally, locally and/or via LLM), and returns a
//!   ranked list plus a single canonical selection.
//!
//! [`daemon::Daemon`] owns the long-lived per-repo service registry that
//! both the CLI and the `serve` HTTP surface dispatch through.

pub mod chunker;
pub mod config;
pub mod daemon;
pub mod embedder;
pub mod error;
pub mod heuristics;
pub mod indexer;
pub mod intent;
pub mod language;
pub mod llm;
pub mod llm_reranker;
pub mod models;
pub mod parser;
pub mod query;
pub mod reranker;
pub mod rewrite;
pub mod route;
pub mod scorer;
pub mod store;
pub mod summarizer;
pub mod tokenizer;
pub mod vector_store;
pub mod walk;

#[cfg(feature = "serve")]
pub mod api;

pub use daemon::Daemon;
pub use error::AinavError;
pub use models::{CodeChunk, IndexStats, QueryMatch, QueryOutcome, QuerySelection, StatusStats};
