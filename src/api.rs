//! HTTP surface: `POST /index`, `POST /query`, `GET /status` (§6), grounded
//! on the teacher's `mcp.rs` HTTP transport (`axum::serve`, `Arc<State>`,
//! `tower_http` tracing) and on `xtrc/api/routes.py` for the request/response
//! shapes and uniform error envelope.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::daemon::Daemon;
use crate::error::AinavError;
use crate::models::{IndexStats, QueryOutcome, SelectionSource, StatusStats};

#[derive(Deserialize)]
struct IndexRequest {
    repo_path: String,
    #[serde(default)]
    rebuild: bool,
}

#[derive(Deserialize)]
struct QueryRequest {
    repo_path: String,
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    8
}

#[derive(Deserialize)]
struct StatusQuery {
    repo_path: String,
}

#[derive(Serialize)]
struct QueryResultPayload {
    file_path: String,
    start_line: u32,
    end_line: u32,
    symbol: Option<String>,
    description: String,
    score: f64,
    vector_score: f64,
    keyword_score: f64,
    symbol_score: f64,
    intent_score: f64,
    structural_score: f64,
    matched_intents: Vec<String>,
    matched_keywords: Vec<String>,
    explanation: String,
}

#[derive(Serialize)]
struct QueryResponse {
    repo_path: String,
    query: String,
    results: Vec<QueryResultPayload>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    selection: Option<SelectionPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selection_source: Option<&'static str>,
    used_llm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    llm_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rewritten_query: Option<String>,
}

#[derive(Serialize)]
struct SelectionPayload {
    file: String,
    line: u32,
    reason: String,
}

#[derive(Serialize)]
struct StatusResponse {
    repo_path: String,
    indexed_files: usize,
    indexed_chunks: usize,
    model: String,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_indexed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}

impl IntoResponse for AinavError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            status: "error",
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

async fn handle_index(
    State(daemon): State<Arc<Daemon>>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexStats>, AinavError> {
    let stats = tokio::task::spawn_blocking(move || daemon.index(&PathBuf::from(req.repo_path), req.rebuild))
        .await
        .map_err(|e| AinavError::Internal(e.to_string()))??;
    Ok(Json(stats))
}

async fn handle_query(
    State(daemon): State<Arc<Daemon>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AinavError> {
    let repo_path = req.repo_path.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        daemon.query(&PathBuf::from(&req.repo_path), &req.query, req.top_k)
    })
    .await
    .map_err(|e| AinavError::Internal(e.to_string()))??;

    Ok(Json(to_query_response(repo_path, outcome)))
}

async fn handle_status(
    State(daemon): State<Arc<Daemon>>,
    Query(params): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, AinavError> {
    let model = daemon.model_name().to_string();
    let repo_path = params.repo_path.clone();
    let stats: StatusStats =
        tokio::task::spawn_blocking(move || daemon.status(&PathBuf::from(&params.repo_path)))
            .await
            .map_err(|e| AinavError::Internal(e.to_string()))??;

    Ok(Json(StatusResponse {
        repo_path,
        indexed_files: stats.indexed_files,
        indexed_chunks: stats.indexed_chunks,
        model,
        healthy: true,
        last_indexed_at: stats.last_indexed_at,
    }))
}

fn to_query_response(repo_path: String, outcome: QueryOutcome) -> QueryResponse {
    let results = outcome
        .matches
        .into_iter()
        .map(|m| QueryResultPayload {
            file_path: m.chunk.file_path,
            start_line: m.chunk.start_line,
            end_line: m.chunk.end_line,
            symbol: m.chunk.symbol,
            description: m.chunk.description,
            score: round6(m.score),
            vector_score: round6(m.vector_score),
            keyword_score: round6(m.keyword_score),
            symbol_score: round6(m.symbol_score),
            intent_score: round6(m.intent_score),
            structural_score: round6(m.structural_score),
            matched_intents: m.matched_intents,
            matched_keywords: m.matched_keywords,
            explanation: m.explanation,
        })
        .collect();

    QueryResponse {
        repo_path,
        query: outcome.rewritten_query.clone().unwrap_or_default(),
        results,
        duration_ms: outcome.duration_ms,
        selection_source: outcome.selection.as_ref().map(|s| match s.source {
            SelectionSource::Vector => "vector",
            SelectionSource::Llm => "llm",
        }),
        selection: outcome.selection.map(|s| SelectionPayload {
            file: s.file,
            line: s.line,
            reason: s.reason,
        }),
        used_llm: outcome.used_llm,
        llm_model: outcome.llm_model,
        llm_latency_ms: outcome.llm_latency_ms,
        rewritten_query: outcome.rewritten_query,
    }
}

/// Builds the router; `serve` binds it to `addr` and runs until ctrl-c.
pub fn router(daemon: Arc<Daemon>) -> Router {
    Router::new()
        .route("/index", post(handle_index))
        .route("/query", post(handle_query))
        .route("/status", get(handle_status))
        .layer(TraceLayer::new_for_http())
        .with_state(daemon)
}

pub async fn serve(daemon: Arc<Daemon>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(daemon);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down HTTP server");
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeChunk, QueryMatch, QuerySelection, SymbolKind};

    fn sample_match() -> QueryMatch {
        QueryMatch {
            chunk: CodeChunk {
                chunk_id: "c1".to_string(),
                repo_path: "/repo".to_string(),
                file_path: "a.py".to_string(),
                language: "python".to_string(),
                start_line: 1,
                end_line: 5,
                symbol: Some("create_user".to_string()),
                symbol_kind: Some(SymbolKind::Function.as_str().to_string()),
                description: "creates a user".to_string(),
                text: String::new(),
                content_hash: "h".to_string(),
                tokens: 10,
                keywords: vec![],
                symbol_terms: vec![],
                structural_terms: vec![],
                intent_tags: vec![],
                route_method: None,
                route_path: None,
                route_intent: None,
                route_resource: None,
                llm_summary: None,
            },
            vector_score: 0.123_456_789,
            keyword_score: 0.0,
            symbol_score: 0.0,
            intent_score: 0.0,
            structural_score: 0.0,
            score: 0.987_654_321,
            matched_intents: vec![],
            matched_keywords: vec![],
            explanation: String::new(),
        }
    }

    #[test]
    fn query_response_rounds_scores_to_six_decimals() {
        let outcome = QueryOutcome {
            matches: vec![sample_match()],
            duration_ms: 12,
            selection: Some(QuerySelection {
                file: "a.py".to_string(),
                line: 1,
                reason: "top match".to_string(),
                source: SelectionSource::Vector,
            }),
            used_llm: false,
            llm_model: None,
            llm_latency_ms: None,
            rewritten_query: None,
        };
        let response = to_query_response("/repo".to_string(), outcome);
        assert_eq!(response.results[0].score, 0.987_654);
        assert_eq!(response.results[0].vector_score, 0.123_457);
        assert_eq!(response.selection_source, Some("vector"));
    }

    #[test]
    fn error_response_carries_canonical_code_and_status() {
        let err = AinavError::InvalidRepo {
            message: "bad repo".to_string(),
        };
        assert_eq!(err.code(), "INVALID_REPO");
        assert_eq!(err.status_code(), 400);
    }
}
