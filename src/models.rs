//! Core data model: symbols, chunks, and query results.
//!
//! Mirrors `xtrc.core.models` in shape; set-valued fields (`keywords`,
//! `symbol_terms`, `structural_terms`, `intent_tags`) are conceptually sets
//! but persisted as sorted, deduplicated `Vec<String>` for deterministic
//! hashing and diffing.

use serde::{Deserialize, Serialize};

/// Kind of a syntactic unit extracted by the symbol parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Handler,
    Route,
    MajorBlock,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Handler => "handler",
            SymbolKind::Route => "route",
            SymbolKind::MajorBlock => "major_block",
        }
    }
}

impl std::str::FromStr for SymbolKind {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(SymbolKind::Function),
            "class" => Ok(SymbolKind::Class),
            "handler" => Ok(SymbolKind::Handler),
            "route" => Ok(SymbolKind::Route),
            "major_block" => Ok(SymbolKind::MajorBlock),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracted syntactic unit: `start_line <= end_line` is an invariant
/// upheld by every producer in `crate::parser`.
#[derive(Debug, Clone)]
pub struct SymbolBlock {
    pub kind: SymbolKind,
    pub name: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
}

/// Unit of retrieval: a contiguous line range with derived metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub chunk_id: String,
    pub repo_path: String,
    pub file_path: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub symbol: Option<String>,
    pub symbol_kind: Option<String>,
    pub description: String,
    pub text: String,
    pub content_hash: String,
    pub tokens: u32,
    pub keywords: Vec<String>,
    pub symbol_terms: Vec<String>,
    pub structural_terms: Vec<String>,
    pub intent_tags: Vec<String>,
    pub route_method: Option<String>,
    pub route_path: Option<String>,
    pub route_intent: Option<String>,
    pub route_resource: Option<String>,
    pub llm_summary: Option<String>,
}

/// `(repo_path, file_path) -> (content_hash, last_indexed_at)`.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub repo_path: String,
    pub file_path: String,
    pub content_hash: String,
    pub last_indexed_at: chrono::DateTime<chrono::Utc>,
}

/// A cached embedding, keyed by the hash of the embedding *input text*.
#[derive(Debug, Clone)]
pub struct EmbeddingCacheEntry {
    pub content_hash: String,
    pub dimension: usize,
    pub vector: Vec<f32>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A cached LLM-generated chunk summary.
#[derive(Debug, Clone)]
pub struct SummaryCacheEntry {
    pub summary_key: String,
    pub model_name: String,
    pub summary: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A single ranked retrieval result with its score components.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub chunk: CodeChunk,
    pub vector_score: f64,
    pub keyword_score: f64,
    pub symbol_score: f64,
    pub intent_score: f64,
    pub structural_score: f64,
    pub score: f64,
    pub matched_intents: Vec<String>,
    pub matched_keywords: Vec<String>,
    pub explanation: String,
}

/// Provenance of the final single selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Vector,
    Llm,
}

impl SelectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionSource::Vector => "vector",
            SelectionSource::Llm => "llm",
        }
    }
}

/// The single canonical jump target chosen for a query.
#[derive(Debug, Clone)]
pub struct QuerySelection {
    pub file: String,
    pub line: u32,
    pub reason: String,
    pub source: SelectionSource,
}

/// Result of an incremental indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub repo_path: String,
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub chunks_indexed: usize,
    pub duration_ms: u64,
}

/// Current index status for a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusStats {
    pub repo_path: String,
    pub indexed_files: usize,
    pub indexed_chunks: usize,
    pub last_indexed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Full result of a query: ranked matches, the chosen selection, and LLM telemetry.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub matches: Vec<QueryMatch>,
    pub duration_ms: u64,
    pub selection: Option<QuerySelection>,
    pub used_llm: bool,
    pub llm_model: Option<String>,
    pub llm_latency_ms: Option<u64>,
    pub rewritten_query: Option<String>,
}

/// Dedup + sort a set-valued field for deterministic persistence (§9).
pub fn canonicalize(mut terms: Vec<String>) -> Vec<String> {
    terms.sort();
    terms.dedup();
    terms
}
