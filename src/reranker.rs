//! Local cross-encoder reranking: a bounded, timeout-guarded second pass
//! over the vector search's top candidates (§4.9), grounded on
//! `xtrc.query.rerank.LocalReranker`.
//!
//! Uses `cross-encoder/ms-marco-MiniLM-L-6-v2` (~91MB ONNX) through the
//! same lazy-session pattern as [`crate::embedder::OrtEmbeddingModel`].

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use ndarray::Array2;
use once_cell::sync::OnceCell;

use crate::error::RerankerError;
use crate::models::QueryMatch;

/// A backend that scores (query, passage) pairs. The query engine depends
/// only on this trait (§4.17 capability traits).
pub trait CrossEncoderModel: Send + Sync {
    fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerError>;
}

/// Bounded, best-effort local reranker: reorders only the top
/// `max_candidates` matches, leaves the remainder untouched, and degrades
/// to a no-op (original order preserved) on timeout or model failure
/// rather than failing the whole query.
pub struct LocalReranker {
    model: Box<dyn CrossEncoderModel>,
    enabled: bool,
    max_candidates: usize,
    timeout: Duration,
}

impl LocalReranker {
    pub fn new(model: Box<dyn CrossEncoderModel>, enabled: bool, max_candidates: usize, timeout_seconds: f64) -> Self {
        Self {
            model,
            enabled,
            max_candidates: max_candidates.max(1),
            timeout: Duration::from_secs_f64(timeout_seconds.max(0.1)),
        }
    }

    /// Returns the (possibly reordered) matches, whether reranking actually
    /// ran, and its latency in milliseconds.
    pub fn rerank(&self, query: &str, matches: Vec<QueryMatch>) -> (Vec<QueryMatch>, bool, Option<u64>) {
        if !self.enabled || matches.len() <= 1 {
            return (matches, false, None);
        }

        let split = self.max_candidates.min(matches.len());
        let (mut target, remainder) = {
            let mut matches = matches;
            let remainder = matches.split_off(split);
            (matches, remainder)
        };

        let pairs: Vec<(String, String)> =
            target.iter().map(|m| (query.to_string(), candidate_text(m))).collect();

        let started = std::time::Instant::now();
        match self.predict_with_timeout(pairs) {
            Ok(scores) if scores.len() == target.len() => {
                for (m, local_score) in target.iter_mut().zip(scores) {
                    let combined = 0.7 * m.score + 0.3 * sigmoid(local_score) as f64;
                    m.explanation = if m.explanation.is_empty() {
                        format!("local reranker score={local_score:.3}")
                    } else {
                        format!("{}; local reranker score={:.3}", m.explanation, local_score)
                    };
                    m.score = combined;
                }
                target.sort_by(|a, b| b.score.total_cmp(&a.score));
                let latency_ms = started.elapsed().as_millis() as u64;
                target.extend(remainder);
                (target, true, Some(latency_ms))
            }
            Ok(_) => {
                tracing::warn!("local reranker returned mismatched score count, skipping");
                target.extend(remainder);
                (target, false, None)
            }
            Err(err) => {
                tracing::warn!(error = %err, "local reranker skipped due to failure");
                target.extend(remainder);
                (target, false, None)
            }
        }
    }

    /// Runs inference on a dedicated thread and gives up after `timeout`,
    /// matching the original's `ThreadPoolExecutor` + `future.result(timeout=...)`.
    fn predict_with_timeout(&self, pairs: Vec<(String, String)>) -> Result<Vec<f32>, RerankerError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let (tx, rx) = mpsc::channel();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let result = self.model.predict(&pairs);
                let _ = tx.send(result);
            });
            match rx.recv_timeout(self.timeout) {
                Ok(result) => result,
                Err(_) => Err(RerankerError::Timeout(self.timeout.as_secs_f64())),
            }
        })
    }
}

fn candidate_text(m: &QueryMatch) -> String {
    let summary = m.chunk.llm_summary.clone().unwrap_or_else(|| m.chunk.description.clone());
    let mut lines = vec![
        format!("file: {}", m.chunk.file_path),
        format!("symbol: {}", m.chunk.symbol.as_deref().unwrap_or("-")),
        format!("type: {}", m.chunk.symbol_kind.as_deref().unwrap_or("major_block")),
        format!(
            "intent: {}",
            if m.chunk.intent_tags.is_empty() {
                "unknown".to_string()
            } else {
                m.chunk.intent_tags.join(", ")
            }
        ),
        format!("summary: {summary}"),
    ];
    if m.chunk.route_method.is_some() || m.chunk.route_path.is_some() {
        lines.push(format!(
            "http: {} {}",
            m.chunk.route_method.as_deref().unwrap_or("-"),
            m.chunk.route_path.as_deref().unwrap_or("-")
        ));
    }
    lines.join("\n")
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

const MODEL_REPO: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";
const MODEL_FILE: &str = "onnx/model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// `CrossEncoderModel` backed by a local ONNX Runtime session.
pub struct OrtCrossEncoder {
    session: Mutex<Option<ort::session::Session>>,
    tokenizer: OnceCell<tokenizers::Tokenizer>,
    model_paths: OnceCell<(PathBuf, PathBuf)>,
    max_length: usize,
}

impl OrtCrossEncoder {
    pub fn load() -> Result<Self, RerankerError> {
        Ok(Self {
            session: Mutex::new(None),
            tokenizer: OnceCell::new(),
            model_paths: OnceCell::new(),
            max_length: 512,
        })
    }

    fn model_paths(&self) -> Result<&(PathBuf, PathBuf), RerankerError> {
        self.model_paths.get_or_try_init(|| {
            use hf_hub::api::sync::Api;
            let api = Api::new().map_err(|e| RerankerError::ModelLoad(e.to_string()))?;
            let repo = api.model(MODEL_REPO.to_string());
            let model_path = repo.get(MODEL_FILE).map_err(|e| RerankerError::ModelLoad(e.to_string()))?;
            let tokenizer_path = repo.get(TOKENIZER_FILE).map_err(|e| RerankerError::ModelLoad(e.to_string()))?;
            Ok((model_path, tokenizer_path))
        })
    }

    fn session(&self) -> Result<std::sync::MutexGuard<'_, Option<ort::session::Session>>, RerankerError> {
        let mut guard = self.session.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_none() {
            let (model_path, _) = self.model_paths()?;
            let session = ort::session::Session::builder()
                .map_err(|e| RerankerError::ModelLoad(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| RerankerError::ModelLoad(e.to_string()))?;
            *guard = Some(session);
        }
        Ok(guard)
    }

    fn tokenizer(&self) -> Result<&tokenizers::Tokenizer, RerankerError> {
        let (_, tokenizer_path) = self.model_paths()?;
        self.tokenizer.get_or_try_init(|| {
            tokenizers::Tokenizer::from_file(tokenizer_path).map_err(|e| RerankerError::ModelLoad(e.to_string()))
        })
    }
}

impl CrossEncoderModel for OrtCrossEncoder {
    fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerError> {
        use ort::value::Tensor;

        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let tokenizer = self.tokenizer()?;
        let encodings: Vec<tokenizers::Encoding> = pairs
            .iter()
            .map(|(q, p)| {
                tokenizer
                    .encode((q.as_str(), p.as_str()), true)
                    .map_err(|e| RerankerError::Inference(e.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let input_ids: Vec<Vec<i64>> = encodings
            .iter()
            .map(|e| e.get_ids().iter().map(|&id| id as i64).collect())
            .collect();
        let attention_mask: Vec<Vec<i64>> = encodings
            .iter()
            .map(|e| e.get_attention_mask().iter().map(|&m| m as i64).collect())
            .collect();
        let max_len = input_ids.iter().map(|v| v.len()).max().unwrap_or(0).min(self.max_length);
        if max_len == 0 {
            return Ok(vec![0.0; pairs.len()]);
        }

        let ids_arr = pad_2d_i64(&input_ids, max_len);
        let mask_arr = pad_2d_i64(&attention_mask, max_len);
        let type_arr = Array2::<i64>::zeros((pairs.len(), max_len));

        let ids_tensor = Tensor::from_array(ids_arr).map_err(|e| RerankerError::Inference(e.to_string()))?;
        let mask_tensor = Tensor::from_array(mask_arr).map_err(|e| RerankerError::Inference(e.to_string()))?;
        let type_tensor = Tensor::from_array(type_arr).map_err(|e| RerankerError::Inference(e.to_string()))?;

        let mut session_guard = self.session()?;
        let session = session_guard.as_mut().expect("session() guarantees Some");
        let outputs = session
            .run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => type_tensor,
            ])
            .map_err(|e| RerankerError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RerankerError::Inference(e.to_string()))?;
        let stride = if shape.len() == 2 { shape[1] as usize } else { 1 };
        let expected_len = pairs.len() * stride;
        if data.len() < expected_len {
            return Err(RerankerError::Inference(format!(
                "model output too short: expected {expected_len} elements, got {}",
                data.len()
            )));
        }

        Ok((0..pairs.len()).map(|i| data[i * stride]).collect())
    }
}

fn pad_2d_i64(inputs: &[Vec<i64>], max_len: usize) -> Array2<i64> {
    let batch_size = inputs.len();
    let mut arr = Array2::from_elem((batch_size, max_len), 0i64);
    for (i, seq) in inputs.iter().enumerate() {
        for (j, &val) in seq.iter().take(max_len).enumerate() {
            arr[[i, j]] = val;
        }
    }
    arr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeChunk, SymbolKind};

    struct FixedScores(Vec<f32>);
    impl CrossEncoderModel for FixedScores {
        fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerError> {
            Ok(self.0.iter().copied().take(pairs.len()).collect())
        }
    }

    struct AlwaysFails;
    impl CrossEncoderModel for AlwaysFails {
        fn predict(&self, _pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerError> {
            Err(RerankerError::Inference("boom".to_string()))
        }
    }

    fn sample_match(id: &str, score: f64) -> QueryMatch {
        QueryMatch {
            chunk: CodeChunk {
                chunk_id: id.to_string(),
                repo_path: "/repo".to_string(),
                file_path: "a.py".to_string(),
                language: "python".to_string(),
                start_line: 1,
                end_line: 2,
                symbol: Some("handler".to_string()),
                symbol_kind: Some(SymbolKind::Function.as_str().to_string()),
                description: "does things".to_string(),
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
            vector_score: score,
            keyword_score: 0.0,
            symbol_score: 0.0,
            intent_score: 0.0,
            structural_score: 0.0,
            score,
            matched_intents: vec![],
            matched_keywords: vec![],
            explanation: String::new(),
        }
    }

    #[test]
    fn sigmoid_midpoint_is_half() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rerank_reorders_top_candidates_by_combined_score() {
        let reranker = LocalReranker::new(Box::new(FixedScores(vec![-5.0, 5.0])), true, 10, 2.0);
        let matches = vec![sample_match("low", 0.5), sample_match("high", 0.5)];
        let (result, used, _) = reranker.rerank("query", matches);
        assert!(used);
        assert_eq!(result[0].chunk.chunk_id, "high");
    }

    #[test]
    fn rerank_leaves_remainder_beyond_max_candidates_untouched() {
        let reranker = LocalReranker::new(Box::new(FixedScores(vec![5.0])), true, 1, 2.0);
        let matches = vec![sample_match("a", 0.9), sample_match("b", 0.1)];
        let (result, _, _) = reranker.rerank("query", matches);
        assert_eq!(result[1].chunk.chunk_id, "b");
    }

    #[test]
    fn rerank_degrades_gracefully_on_model_failure() {
        let reranker = LocalReranker::new(Box::new(AlwaysFails), true, 10, 2.0);
        let matches = vec![sample_match("a", 0.9), sample_match("b", 0.1)];
        let (result, used, latency) = reranker.rerank("query", matches);
        assert!(!used);
        assert!(latency.is_none());
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn disabled_reranker_is_a_no_op() {
        let reranker = LocalReranker::new(Box::new(FixedScores(vec![5.0, -5.0])), false, 10, 2.0);
        let matches = vec![sample_match("a", 0.9), sample_match("b", 0.1)];
        let (result, used, _) = reranker.rerank("query", matches);
        assert!(!used);
        assert_eq!(result[0].chunk.chunk_id, "a");
    }
}
