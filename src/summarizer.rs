//! Optional LLM one-line chunk summaries, cached by content so a repeat
//! index run never re-invokes the model for unchanged code (§4.10),
//! grounded on `xtrc.llm.chunk_summarizer.GeminiChunkSummarizer`.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::llm::Llm;
use crate::models::CodeChunk;
use crate::store::MetadataStore;

const SUMMARY_PROMPT: &str = "Summarize this code chunk for retrieval indexing.\n\n\
Rules:\n\
- One concise sentence.\n\
- Focus on behavior, side effects, and domain intent.\n\
- Mention HTTP semantics if present (create/update/delete/read, method, resource).\n\
- No markdown.\n\
- Max 40 words.\n\n\
Language: {language}\n\
File: {file_path}\n\
Symbol: {symbol}\n\
Description: {description}\n\n\
Code:\n\
{code}\n";

/// `sha256(model|chunk_id|content_hash|text)` — deliberately keyed on the
/// chunk's own content hash and id rather than its route metadata, so a
/// chunk's summary cache entry survives independent of any re-derivation
/// of its route/intent tags as long as the underlying text is unchanged.
pub fn summary_key(model_name: &str, chunk: &CodeChunk) -> String {
    let material = format!("{model_name}|{}|{}|{}", chunk.chunk_id, chunk.content_hash, chunk.text);
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct ChunkSummarizer {
    store: Arc<MetadataStore>,
    llm: Arc<dyn Llm>,
    model_name: String,
    max_chars: usize,
}

impl ChunkSummarizer {
    pub fn new(store: Arc<MetadataStore>, llm: Arc<dyn Llm>, model_name: impl Into<String>, max_chars: usize) -> Self {
        Self {
            store,
            llm,
            model_name: model_name.into(),
            max_chars: max_chars.max(64),
        }
    }

    /// Summarizes whatever chunks aren't already cached, persists the new
    /// ones, and returns `chunk_id -> summary` plus total LLM latency.
    pub fn summarize_chunks(&self, chunks: &[CodeChunk]) -> (HashMap<String, String>, u64) {
        if chunks.is_empty() {
            return (HashMap::new(), 0);
        }

        let key_by_chunk_id: HashMap<String, String> =
            chunks.iter().map(|c| (c.chunk_id.clone(), summary_key(&self.model_name, c))).collect();
        let keys: Vec<String> = key_by_chunk_id.values().cloned().collect();
        let cached = self
            .store
            .get_cached_chunk_summaries(&keys)
            .unwrap_or_default();

        let mut summaries = HashMap::new();
        let mut to_persist = HashMap::new();
        let mut total_latency_ms = 0u64;

        for chunk in chunks {
            let key = &key_by_chunk_id[&chunk.chunk_id];
            if let Some(cached_summary) = cached.get(key) {
                summaries.insert(chunk.chunk_id.clone(), cached_summary.clone());
                continue;
            }

            let prompt = SUMMARY_PROMPT
                .replace("{language}", &chunk.language)
                .replace("{file_path}", &chunk.file_path)
                .replace("{symbol}", chunk.symbol.as_deref().unwrap_or("-"))
                .replace("{description}", &chunk.description)
                .replace("{code}", &truncate_code(&chunk.text, 2400));

            match self.llm.complete_text(&prompt, &self.model_name) {
                Ok((summary, latency_ms)) => {
                    let cleaned = self.clean_summary(&summary);
                    if cleaned.is_empty() {
                        continue;
                    }
                    summaries.insert(chunk.chunk_id.clone(), cleaned.clone());
                    to_persist.insert(key.clone(), cleaned);
                    total_latency_ms += latency_ms;
                }
                Err(err) => {
                    tracing::warn!(chunk_id = %chunk.chunk_id, error = %err, "chunk summary failed");
                }
            }
        }

        if !to_persist.is_empty() {
            if let Err(err) = self.store.upsert_cached_chunk_summaries(&self.model_name, &to_persist) {
                tracing::warn!(error = %err, "failed to persist chunk summaries");
            }
        }

        (summaries, total_latency_ms)
    }

    pub fn apply_summaries(chunks: Vec<CodeChunk>, summaries: &HashMap<String, String>) -> Vec<CodeChunk> {
        if summaries.is_empty() {
            return chunks;
        }
        chunks
            .into_iter()
            .map(|mut chunk| {
                if let Some(summary) = summaries.get(&chunk.chunk_id) {
                    chunk.llm_summary = Some(summary.clone());
                }
                chunk
            })
            .collect()
    }

    fn clean_summary(&self, text: &str) -> String {
        let one_line: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if one_line.len() <= self.max_chars {
            one_line
        } else {
            let truncated: String = one_line.chars().take(self.max_chars.saturating_sub(3)).collect();
            format!("{}...", truncated.trim_end())
        }
    }
}

fn truncate_code(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        format!("{}\n# ... truncated ...", &text[..limit])
    }
}

/// Text actually handed to the embedding model: a short structured
/// preamble (file/symbol/type/intent/summary) ahead of the raw code, so
/// retrieval favors the chunk's declared intent over lexical noise.
pub fn build_embedding_text(chunk: &CodeChunk) -> String {
    let intent_line = if chunk.intent_tags.is_empty() {
        "unknown".to_string()
    } else {
        chunk.intent_tags.join(", ")
    };
    let summary = chunk.llm_summary.as_deref().unwrap_or(&chunk.description);

    let mut parts = vec![
        format!("File: {}", chunk.file_path),
        format!("Symbol: {}", chunk.symbol.as_deref().unwrap_or("-")),
        format!("Type: {}", chunk.symbol_kind.as_deref().unwrap_or("major_block")),
        format!("Intent: {intent_line}"),
        String::new(),
        "Summary:".to_string(),
        summary.to_string(),
    ];

    if chunk.route_method.is_some() || chunk.route_path.is_some() {
        parts.push(String::new());
        parts.push("HTTP Metadata (if applicable):".to_string());
        parts.push(format!("Method: {}", chunk.route_method.as_deref().unwrap_or("-")));
        parts.push(format!("Route: {}", chunk.route_path.as_deref().unwrap_or("-")));
    }

    parts.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::models::SymbolKind;

    struct FakeLlm(&'static str);
    impl Llm for FakeLlm {
        fn complete_text(&self, _prompt: &str, _model_name: &str) -> Result<(String, u64), LlmError> {
            Ok((self.0.to_string(), 5))
        }
        fn complete_json(&self, _prompt: &str, _model_name: &str) -> Result<(serde_json::Value, u64), LlmError> {
            unreachable!()
        }
    }

    fn chunk(id: &str) -> CodeChunk {
        CodeChunk {
            chunk_id: id.to_string(),
            repo_path: "/repo".to_string(),
            file_path: "a.py".to_string(),
            language: "python".to_string(),
            start_line: 1,
            end_line: 2,
            symbol: Some("create_user".to_string()),
            symbol_kind: Some(SymbolKind::Function.as_str().to_string()),
            description: "creates a user".to_string(),
            text: "def create_user(): ...".to_string(),
            content_hash: "h1".to_string(),
            tokens: 5,
            keywords: vec![],
            symbol_terms: vec![],
            structural_terms: vec![],
            intent_tags: vec![],
            route_method: None,
            route_path: None,
            route_intent: None,
            route_resource: None,
            llm_summary: None,
        }
    }

    #[test]
    fn summary_key_is_stable_for_same_inputs() {
        let c = chunk("c1");
        assert_eq!(summary_key("model-a", &c), summary_key("model-a", &c));
    }

    #[test]
    fn summarize_chunks_persists_and_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(&dir.path().join("meta.db")).unwrap());
        let llm: Arc<dyn Llm> = Arc::new(FakeLlm("Creates a new user record."));
        let summarizer = ChunkSummarizer::new(store, llm, "model-a", 320);

        let chunks = vec![chunk("c1")];
        let (summaries, latency) = summarizer.summarize_chunks(&chunks);
        assert_eq!(summaries["c1"], "Creates a new user record.");
        assert!(latency > 0);

        let (summaries_again, latency_again) = summarizer.summarize_chunks(&chunks);
        assert_eq!(summaries_again["c1"], "Creates a new user record.");
        assert_eq!(latency_again, 0, "cached summary should not re-invoke the model");
    }

    #[test]
    fn build_embedding_text_omits_http_block_when_absent() {
        let text = build_embedding_text(&chunk("c1"));
        assert!(text.starts_with("File: a.py"));
        assert!(text.contains("Summary:\ncreates a user"));
        assert!(!text.contains("HTTP Metadata"));
    }

    #[test]
    fn build_embedding_text_includes_http_block_when_route_present() {
        let mut c = chunk("c1");
        c.route_method = Some("POST".to_string());
        c.route_path = Some("/users".to_string());
        c.llm_summary = Some("Creates a new user.".to_string());
        let text = build_embedding_text(&c);
        assert!(text.contains("Summary:\nCreates a new user."));
        assert!(text.contains("HTTP Metadata (if applicable):"));
        assert!(text.contains("Method: POST"));
        assert!(text.contains("Route: /users"));
    }
}
