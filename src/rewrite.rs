//! Optional LLM query rewriting ahead of embedding + vector search
//! (§4.7), grounded on `xtrc.query.rewrite.QueryRewriter`.

use std::sync::Arc;

use crate::llm::Llm;

const REWRITE_PROMPT: &str = "Rewrite this code search query into precise backend intent.\n\n\
Rules:\n\
- Keep original user intent.\n\
- Mention endpoint/handler behavior when applicable.\n\
- Include CRUD action and likely HTTP semantics if implied.\n\
- Keep to one sentence.\n\
- Return plain text only.\n\n\
Query:\n{query}\n";

pub struct QueryRewriter {
    llm: Option<Arc<dyn Llm>>,
    model_name: String,
    enabled: bool,
}

impl QueryRewriter {
    pub fn new(llm: Option<Arc<dyn Llm>>, model_name: impl Into<String>, enabled: bool) -> Self {
        Self {
            llm,
            model_name: model_name.into(),
            enabled,
        }
    }

    /// Returns `(query_to_use, was_rewritten, latency_ms)`. Falls back to
    /// the original query — never errors — on any LLM failure, matching
    /// the original's swallow-and-log behavior.
    pub fn rewrite(&self, query: &str) -> (String, bool, Option<u64>) {
        let Some(llm) = self.llm.as_deref() else {
            return (query.to_string(), false, None);
        };
        if !self.enabled {
            return (query.to_string(), false, None);
        }
        let normalized = query.trim();
        if normalized.is_empty() {
            return (query.to_string(), false, None);
        }

        let prompt = REWRITE_PROMPT.replace("{query}", normalized);
        match llm.complete_text(&prompt, &self.model_name) {
            Ok((rewritten, latency_ms)) if !rewritten.is_empty() => {
                let changed = rewritten != normalized;
                (rewritten, changed, Some(latency_ms))
            }
            Ok(_) => (query.to_string(), false, None),
            Err(err) => {
                tracing::warn!(error = %err, "query rewrite failed");
                (query.to_string(), false, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;

    struct FakeLlm(&'static str);
    impl Llm for FakeLlm {
        fn complete_text(&self, _prompt: &str, _model_name: &str) -> Result<(String, u64), LlmError> {
            Ok((self.0.to_string(), 7))
        }
        fn complete_json(&self, _p: &str, _m: &str) -> Result<(serde_json::Value, u64), LlmError> {
            unreachable!()
        }
    }

    #[test]
    fn disabled_rewriter_returns_original_query() {
        let llm: Arc<dyn Llm> = Arc::new(FakeLlm("rewritten query"));
        let rewriter = QueryRewriter::new(Some(llm), "model-a", false);
        let (query, changed, latency) = rewriter.rewrite("find the parser");
        assert_eq!(query, "find the parser");
        assert!(!changed);
        assert!(latency.is_none());
    }

    #[test]
    fn enabled_rewriter_returns_llm_output() {
        let llm: Arc<dyn Llm> = Arc::new(FakeLlm("find the tree-sitter symbol parser implementation"));
        let rewriter = QueryRewriter::new(Some(llm), "model-a", true);
        let (query, changed, latency) = rewriter.rewrite("find the parser");
        assert_eq!(query, "find the tree-sitter symbol parser implementation");
        assert!(changed);
        assert!(latency.is_some());
    }

    #[test]
    fn no_llm_configured_is_a_no_op() {
        let rewriter = QueryRewriter::new(None, "model-a", true);
        let (query, changed, _) = rewriter.rewrite("find the parser");
        assert_eq!(query, "find the parser");
        assert!(!changed);
    }
}
