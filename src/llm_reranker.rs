//! Final-selection LLM reranker: picks a single canonical jump target
//! from the top hybrid-scored candidates when vector confidence alone
//! isn't high enough (§4.11), grounded on `xtrc.llm.reranker.GeminiReranker`.
//!
//! `GeminiReranker` also runs its own rewrite step ahead of reranking;
//! that second rewrite path is intentionally not ported here — the query
//! engine's single pre-search rewrite (`crate::rewrite`) already covers
//! it, and this reranker only selects among candidates already produced
//! by that search, so it has no rewritten query of its own to surface.

use std::sync::Arc;

use crate::llm::Llm;
use crate::models::{QueryMatch, QuerySelection, SelectionSource};

const RERANK_PROMPT: &str = "You are reranking semantic code search candidates.\n\n\
Task:\n\
- Choose the single best code candidate that answers the user query.\n\
- Only choose from the provided candidates.\n\
- Prefer exact behavioral relevance over lexical overlap.\n\n\
Return only a JSON object with this schema:\n\
{{\n  \"file\": \"relative/path.py\",\n  \"line\": 42,\n  \"reason\": \"brief technical explanation\"\n}}\n\n\
User Query:\n{query}\n\n\
Candidates (JSON):\n{candidates_json}\n";

/// Outcome of one reranking decision, enough to populate the query
/// outcome's LLM telemetry fields (§7).
pub struct RerankDecision {
    pub selection: QuerySelection,
    pub used_llm: bool,
    pub llm_model: Option<String>,
    pub llm_latency_ms: Option<u64>,
}

pub struct LlmReranker {
    llm: Arc<dyn Llm>,
    model_name: String,
    threshold: f64,
    max_candidates: usize,
}

impl LlmReranker {
    pub fn new(llm: Arc<dyn Llm>, model_name: impl Into<String>, threshold: f64, max_candidates: usize) -> Self {
        Self {
            llm,
            model_name: model_name.into(),
            threshold: threshold.clamp(0.0, 1.0),
            max_candidates: max_candidates.max(1),
        }
    }

    /// `None` only when `matches` is empty; otherwise always resolves to a
    /// selection — falling back to the top vector match on any LLM failure.
    pub fn decide(&self, query: &str, matches: &[QueryMatch]) -> Option<RerankDecision> {
        let best = matches.first()?;

        if best.vector_score >= self.threshold {
            let reason = format!(
                "High vector confidence {:.3} meets threshold {:.2}; returning top semantic match.",
                best.vector_score, self.threshold
            );
            return Some(RerankDecision {
                selection: QuerySelection {
                    file: best.chunk.file_path.clone(),
                    line: best.chunk.start_line,
                    reason,
                    source: SelectionSource::Vector,
                },
                used_llm: false,
                llm_model: None,
                llm_latency_ms: None,
            });
        }

        let candidates: Vec<&QueryMatch> = matches.iter().take(self.max_candidates).collect();
        let prompt = self.build_prompt(query, &candidates);

        match self.llm.complete_json(&prompt, &self.model_name) {
            Ok((payload, latency_ms)) => match selection_from_payload(&payload, &candidates) {
                Ok(selection) => Some(RerankDecision {
                    selection,
                    used_llm: true,
                    llm_model: Some(self.model_name.clone()),
                    llm_latency_ms: Some(latency_ms),
                }),
                Err(reason) => Some(self.fallback(best, &reason, Some(latency_ms))),
            },
            Err(err) => Some(self.fallback(best, &err.to_string(), None)),
        }
    }

    fn fallback(&self, best: &QueryMatch, reason: &str, latency_ms: Option<u64>) -> RerankDecision {
        let reason = format!(
            "LLM rerank failed ({reason}); falling back to top vector candidate with score {:.3}.",
            best.vector_score
        );
        RerankDecision {
            selection: QuerySelection {
                file: best.chunk.file_path.clone(),
                line: best.chunk.start_line,
                reason,
                source: SelectionSource::Vector,
            },
            used_llm: false,
            llm_model: Some(self.model_name.clone()),
            llm_latency_ms: latency_ms,
        }
    }

    fn build_prompt(&self, query: &str, candidates: &[&QueryMatch]) -> String {
        let serialized: Vec<serde_json::Value> = candidates
            .iter()
            .enumerate()
            .map(|(idx, m)| {
                let chunk = &m.chunk;
                serde_json::json!({
                    "rank": idx + 1,
                    "file_path": chunk.file_path,
                    "line_range": {"start": chunk.start_line, "end": chunk.end_line},
                    "code_snippet": truncate_snippet(&chunk.text, 1800),
                    "metadata": {
                        "language": chunk.language,
                        "symbol": chunk.symbol,
                        "symbol_kind": chunk.symbol_kind,
                        "description": chunk.description,
                        "llm_summary": chunk.llm_summary,
                        "route_method": chunk.route_method,
                        "route_path": chunk.route_path,
                        "route_intent": chunk.route_intent,
                        "route_resource": chunk.route_resource,
                        "intent_tags": chunk.intent_tags,
                        "keywords": chunk.keywords,
                        "symbol_terms": chunk.symbol_terms,
                        "structural_terms": chunk.structural_terms,
                    },
                    "scores": {
                        "hybrid": m.score,
                        "vector": m.vector_score,
                        "keyword": m.keyword_score,
                        "symbol": m.symbol_score,
                    },
                })
            })
            .collect();

        RERANK_PROMPT
            .replace("{query}", query)
            .replace("{candidates_json}", &serde_json::to_string_pretty(&serialized).unwrap_or_default())
    }
}

fn truncate_snippet(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        text.to_string()
    } else {
        format!("{}\n# ... truncated ...", &text[..max_chars])
    }
}

fn selection_from_payload(payload: &serde_json::Value, candidates: &[&QueryMatch]) -> Result<QuerySelection, String> {
    let file_path = payload["file"].as_str().filter(|s| !s.trim().is_empty());
    let line = payload["line"].as_i64().filter(|&l| l > 0);
    let reason = payload["reason"].as_str().filter(|s| !s.trim().is_empty());

    let (file_path, mut line, reason) = match (file_path, line, reason) {
        (Some(f), Some(l), Some(r)) => (f, l as u32, r.trim().to_string()),
        _ => return Err("LLM output missing required file/line/reason fields".to_string()),
    };

    let exact = candidates
        .iter()
        .find(|m| m.chunk.file_path == file_path && m.chunk.start_line <= line && line <= m.chunk.end_line);

    let chosen = if let Some(m) = exact {
        *m
    } else {
        let same_file: Vec<&&QueryMatch> = candidates.iter().filter(|m| m.chunk.file_path == file_path).collect();
        match same_file.into_iter().max_by(|a, b| a.score.total_cmp(&b.score)) {
            Some(m) => {
                line = m.chunk.start_line;
                *m
            }
            None => return Err("LLM selected a file that is not part of the candidate list".to_string()),
        }
    };

    Ok(QuerySelection {
        file: chosen.chunk.file_path.clone(),
        line,
        reason,
        source: SelectionSource::Llm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::models::{CodeChunk, SymbolKind};

    struct FixedJson(serde_json::Value);
    impl Llm for FixedJson {
        fn complete_text(&self, _p: &str, _m: &str) -> Result<(String, u64), LlmError> {
            unreachable!()
        }
        fn complete_json(&self, _p: &str, _m: &str) -> Result<(serde_json::Value, u64), LlmError> {
            Ok((self.0.clone(), 42))
        }
    }

    struct AlwaysFails;
    impl Llm for AlwaysFails {
        fn complete_text(&self, _p: &str, _m: &str) -> Result<(String, u64), LlmError> {
            unreachable!()
        }
        fn complete_json(&self, _p: &str, _m: &str) -> Result<(serde_json::Value, u64), LlmError> {
            Err(LlmError::Failure("network error".to_string()))
        }
    }

    fn sample_match(file: &str, start: u32, end: u32, vector_score: f64) -> QueryMatch {
        QueryMatch {
            chunk: CodeChunk {
                chunk_id: format!("{file}:{start}"),
                repo_path: "/repo".to_string(),
                file_path: file.to_string(),
                language: "python".to_string(),
                start_line: start,
                end_line: end,
                symbol: None,
                symbol_kind: Some(SymbolKind::Function.as_str().to_string()),
                description: String::new(),
                text: "code".to_string(),
                content_hash: "h".to_string(),
                tokens: 1,
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
            vector_score,
            keyword_score: 0.0,
            symbol_score: 0.0,
            intent_score: 0.0,
            structural_score: 0.0,
            score: vector_score,
            matched_intents: vec![],
            matched_keywords: vec![],
            explanation: String::new(),
        }
    }

    #[test]
    fn high_vector_confidence_skips_llm() {
        let llm: Arc<dyn Llm> = Arc::new(AlwaysFails);
        let reranker = LlmReranker::new(llm, "model-a", 0.85, 10);
        let matches = vec![sample_match("a.py", 1, 5, 0.9)];
        let decision = reranker.decide("query", &matches).unwrap();
        assert!(!decision.used_llm);
        assert_eq!(decision.selection.source, SelectionSource::Vector);
    }

    #[test]
    fn llm_selection_resolves_exact_candidate() {
        let llm: Arc<dyn Llm> =
            Arc::new(FixedJson(serde_json::json!({"file": "a.py", "line": 3, "reason": "matches create handler"})));
        let reranker = LlmReranker::new(llm, "model-a", 0.85, 10);
        let matches = vec![sample_match("a.py", 1, 5, 0.5), sample_match("b.py", 1, 5, 0.4)];
        let decision = reranker.decide("query", &matches).unwrap();
        assert!(decision.used_llm);
        assert_eq!(decision.selection.file, "a.py");
        assert_eq!(decision.selection.line, 3);
    }

    #[test]
    fn llm_failure_falls_back_to_top_vector_match() {
        let llm: Arc<dyn Llm> = Arc::new(AlwaysFails);
        let reranker = LlmReranker::new(llm, "model-a", 0.85, 10);
        let matches = vec![sample_match("a.py", 1, 5, 0.5)];
        let decision = reranker.decide("query", &matches).unwrap();
        assert!(!decision.used_llm);
        assert_eq!(decision.selection.file, "a.py");
    }
}
