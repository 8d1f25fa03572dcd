//! Unified error types for the indexing and query pipeline.

use thiserror::Error;

/// Storage-layer failures (metadata store open/read/write).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Embedding-model failures.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("keys and texts length mismatch: {keys} keys, {texts} texts")]
    LengthMismatch { keys: usize, texts: usize },
}

/// Vector-store failures.
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(
        "indexed vectors are incompatible with current embedding model (index_dim={index_dim}, model_dim={model_dim}); run with --rebuild"
    )]
    DimensionMismatch { index_dim: usize, model_dim: usize },
}

/// Cross-encoder reranker failures.
#[derive(Error, Debug)]
pub enum RerankerError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("reranker timed out after {0:.1}s")]
    Timeout(f64),
}

/// Outcome of an external LLM call: distinguishes timeout from other failure,
/// per the error-as-value design (§9).
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("llm call timed out after {0:.1}s")]
    Timeout(f64),
    #[error("llm call failed: {0}")]
    Failure(String),
    #[error("llm returned malformed output: {0}")]
    MalformedOutput(String),
}

/// Errors surfaced to RPC/CLI callers, carrying a canonical error code.
#[derive(Error, Debug)]
pub enum AinavError {
    #[error("{message}")]
    InvalidRepo { message: String },
    #[error("{message}")]
    InvalidQuery { message: String },
    #[error(transparent)]
    DimensionMismatch(#[from] VectorStoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AinavError {
    /// Canonical error code for the uniform JSON error envelope (§6/§7).
    pub fn code(&self) -> &'static str {
        match self {
            AinavError::InvalidRepo { .. } => "INVALID_REPO",
            AinavError::InvalidQuery { .. } => "INVALID_REPO",
            AinavError::DimensionMismatch(_) => "INDEX_DIMENSION_MISMATCH",
            AinavError::Store(_) => "SERVER_ERROR",
            AinavError::Embedder(_) => "SERVER_ERROR",
            AinavError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status carried alongside the JSON body.
    pub fn status_code(&self) -> u16 {
        match self {
            AinavError::InvalidRepo { .. } | AinavError::InvalidQuery { .. } => 400,
            AinavError::DimensionMismatch(_) => 409,
            AinavError::Store(_) | AinavError::Embedder(_) => 500,
            AinavError::Internal(_) => 500,
        }
    }

    /// Extra machine-readable detail for the error envelope (dimension pairs, etc).
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AinavError::DimensionMismatch(VectorStoreError::DimensionMismatch {
                index_dim,
                model_dim,
            }) => Some(serde_json::json!({"index_dim": index_dim, "model_dim": model_dim})),
            _ => None,
        }
    }
}
