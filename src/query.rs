//! Hybrid query engine: rewrite → embed → vector search → hybrid score →
//! heuristic multiplier → optional local rerank → optional LLM selection
//! (§4.6-4.11), grounded on `xtrc.core.query_engine.QueryEngine`.

use std::path::Path;
use std::sync::Arc;

use crate::embedder::EmbeddingService;
use crate::heuristics::RankingHeuristics;
use crate::llm_reranker::LlmReranker;
use crate::models::{QueryMatch, QueryOutcome, QuerySelection, SelectionSource};
use crate::reranker::LocalReranker;
use crate::rewrite::QueryRewriter;
use crate::scorer::HybridScorer;
use crate::store::MetadataStore;
use crate::vector_store::VectorStore;

pub struct QueryEngine {
    pub metadata_store: Arc<MetadataStore>,
    pub embedding_service: Arc<EmbeddingService>,
    pub vector_store: Arc<VectorStore>,
    pub scorer: HybridScorer,
    pub query_rewriter: Option<QueryRewriter>,
    pub local_reranker: Option<Arc<LocalReranker>>,
    pub ranking_heuristics: Option<RankingHeuristics>,
    pub llm_reranker: Option<LlmReranker>,
}

impl QueryEngine {
    pub fn query(&self, repo_path: &Path, query_text: &str, top_k: usize) -> QueryOutcome {
        let started = std::time::Instant::now();
        let repo_key = dunce::canonicalize(repo_path)
            .unwrap_or_else(|_| repo_path.to_path_buf())
            .to_string_lossy()
            .to_string();

        let mut rewritten_query = None;
        let query_for_search = if let Some(rewriter) = &self.query_rewriter {
            let (candidate, changed, _) = rewriter.rewrite(query_text);
            if changed {
                rewritten_query = Some(candidate.clone());
            }
            candidate
        } else {
            query_text.to_string()
        };

        let query_embedding = match self.embedding_service.embed_query(&self.metadata_store, &query_for_search) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(error = %err, "query embedding failed");
                return empty_outcome(started, rewritten_query);
            }
        };

        let candidate_limit = (top_k * 12).max(top_k);
        let hits = match self.vector_store.search(&repo_key, &query_embedding, candidate_limit) {
            Ok(h) => h,
            Err(err) => {
                tracing::error!(error = %err, "vector search failed");
                return empty_outcome(started, rewritten_query);
            }
        };

        let chunk_ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let chunks = self.metadata_store.get_chunks_by_ids(&chunk_ids).unwrap_or_default();

        let mut matches: Vec<QueryMatch> = Vec::new();
        for hit in &hits {
            let Some(chunk) = chunks.get(&hit.chunk_id) else { continue };

            let components = self.scorer.score(
                &query_for_search,
                hit.score,
                &chunk.keywords,
                &chunk.symbol_terms,
                chunk.route_intent.as_deref(),
                chunk.route_method.as_deref(),
                chunk.route_resource.as_deref(),
                &chunk.structural_terms,
            );

            let mut explanation_bits = vec![
                format!("semantic={:.3}", components.vector),
                format!("keyword={:.3}", components.keyword),
                format!("symbol={:.3}", components.symbol),
                format!("intent={:.3}", components.intent),
                format!("structural={:.3}", components.structural),
            ];

            let mut adjusted_total = components.total;
            let mut matched_intents = Vec::new();
            let mut matched_keywords = Vec::new();
            if let Some(heuristics) = &self.ranking_heuristics {
                let decision = heuristics.evaluate(&query_for_search, chunk);
                adjusted_total = components.total * decision.multiplier;
                matched_intents = decision.matched_intents;
                matched_keywords = decision.matched_keywords;
                if !decision.reasons.is_empty() {
                    explanation_bits.push(format!("heuristics={}", decision.reasons.join(", ")));
                }
            }

            matches.push(QueryMatch {
                chunk: chunk.clone(),
                score: adjusted_total,
                vector_score: components.vector,
                keyword_score: components.keyword,
                symbol_score: components.symbol,
                intent_score: components.intent,
                structural_score: components.structural,
                matched_intents,
                matched_keywords,
                explanation: explanation_bits.join("; "),
            });
        }

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.vector_score.total_cmp(&a.vector_score))
                .then_with(|| (b.chunk.symbol.is_some() as u8).cmp(&(a.chunk.symbol.is_some() as u8)))
                .then_with(|| a.chunk.tokens.cmp(&b.chunk.tokens))
        });

        if let Some(local_reranker) = &self.local_reranker {
            if !matches.is_empty() {
                let split = matches.len().min(10);
                let remainder = matches.split_off(split);
                let (reranked, _, _) = local_reranker.rerank(&query_for_search, matches);
                matches = reranked;
                matches.extend(remainder);
            }
        }

        let mut selection = None;
        let mut used_llm = false;
        let mut llm_model = None;
        let mut llm_latency_ms = None;

        if !matches.is_empty() {
            match &self.llm_reranker {
                None => {
                    let top = &matches[0];
                    selection = Some(QuerySelection {
                        file: top.chunk.file_path.clone(),
                        line: top.chunk.start_line,
                        reason: "LLM reranker is disabled; returning highest scoring semantic result.".to_string(),
                        source: SelectionSource::Vector,
                    });
                }
                Some(reranker) => {
                    if let Some(decision) = reranker.decide(&query_for_search, &matches) {
                        selection = Some(decision.selection);
                        used_llm = decision.used_llm;
                        llm_model = decision.llm_model;
                        llm_latency_ms = decision.llm_latency_ms;
                    }
                }
            }
        }

        matches.truncate(top_k);

        QueryOutcome {
            matches,
            duration_ms: started.elapsed().as_millis() as u64,
            selection,
            used_llm,
            llm_model,
            llm_latency_ms,
            rewritten_query,
        }
    }
}

fn empty_outcome(started: std::time::Instant, rewritten_query: Option<String>) -> QueryOutcome {
    QueryOutcome {
        matches: Vec::new(),
        duration_ms: started.elapsed().as_millis() as u64,
        selection: None,
        used_llm: false,
        llm_model: None,
        llm_latency_ms: None,
        rewritten_query,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingModel;
    use crate::error::EmbedderError;
    use crate::models::SymbolKind;

    struct FakeModel;
    impl EmbeddingModel for FakeModel {
        fn dimension(&self) -> usize {
            3
        }
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    fn sample_chunk(id: &str) -> crate::models::CodeChunk {
        crate::models::CodeChunk {
            chunk_id: id.to_string(),
            repo_path: "/repo".to_string(),
            file_path: "a.py".to_string(),
            language: "python".to_string(),
            start_line: 1,
            end_line: 5,
            symbol: Some("create_user".to_string()),
            symbol_kind: Some(SymbolKind::Function.as_str().to_string()),
            description: "creates a user".to_string(),
            text: "def create_user(): ...".to_string(),
            content_hash: "h".to_string(),
            tokens: 10,
            keywords: vec!["create".to_string(), "user".to_string()],
            symbol_terms: vec!["create_user".to_string()],
            structural_terms: vec![],
            intent_tags: vec![],
            route_method: Some("POST".to_string()),
            route_path: Some("/users".to_string()),
            route_intent: Some("create".to_string()),
            route_resource: Some("user".to_string()),
            llm_summary: None,
        }
    }

    #[test]
    fn query_without_rerankers_returns_top_vector_selection() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(&dir.path().join("meta.db")).unwrap());
        let vector_store = Arc::new(VectorStore::open(dir.path()).unwrap());
        let embedding_service = Arc::new(EmbeddingService::new(Box::new(FakeModel), "intfloat/e5-base-v2"));

        let chunk = sample_chunk("c1");
        store.upsert_chunks(&[chunk.clone()]).unwrap();
        vector_store.upsert_chunks("/repo", &[chunk], &[vec![1.0, 0.0, 0.0]]).unwrap();

        let engine = QueryEngine {
            metadata_store: store,
            embedding_service,
            vector_store,
            scorer: HybridScorer::new(),
            query_rewriter: None,
            local_reranker: None,
            ranking_heuristics: None,
            llm_reranker: None,
        };

        let outcome = engine.query(Path::new("/repo"), "create a new user", 5);
        assert_eq!(outcome.matches.len(), 1);
        assert!(outcome.selection.is_some());
        assert_eq!(outcome.selection.unwrap().source, SelectionSource::Vector);
    }
}
