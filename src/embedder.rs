//! Sentence-embedding generation with `ort` + `tokenizers`, wrapped in a
//! two-tier (memory + persisted) cache keyed by `sha256(input text)` (§4.5).
//!
//! Mirrors `xtrc.core.embeddings.EmbeddingService`: the core engine never
//! branches on a specific model's identity, only on its declared family
//! (e5 / bge / other) to pick a document/query prefix.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use ndarray::Array2;
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::error::EmbedderError;
use crate::store::MetadataStore;

/// sha256 hex digest of the exact text handed to the model, used as the
/// cache key in both tiers.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A backend capable of turning text into fixed-dimension vectors. The
/// query engine and indexer depend only on this trait, never on `ort`
/// directly, so a non-ONNX backend can be swapped in without touching
/// either (§4.5, §4.17 "capability traits").
pub trait EmbeddingModel: Send + Sync {
    fn dimension(&self) -> usize;
    /// Batched raw embedding, already model-prefixed by the caller.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;
}

/// Prefixing convention keyed off the model name, matching
/// `EmbeddingService._prepare_document_text` / `_prepare_query_text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelFamily {
    E5,
    Bge,
    Other,
}

fn model_family(model_name: &str) -> ModelFamily {
    let lower = model_name.to_lowercase();
    if lower.contains("e5") {
        ModelFamily::E5
    } else if lower.contains("bge") {
        ModelFamily::Bge
    } else {
        ModelFamily::Other
    }
}

fn prepare_document_text(family: ModelFamily, text: &str) -> String {
    match family {
        ModelFamily::E5 if !text.starts_with("passage: ") => format!("passage: {text}"),
        _ => text.to_string(),
    }
}

fn prepare_query_text(family: ModelFamily, text: &str) -> String {
    match family {
        ModelFamily::Bge => {
            const PREFIX: &str = "Represent this sentence for searching relevant passages: ";
            if text.starts_with(PREFIX) {
                text.to_string()
            } else {
                format!("{PREFIX}{text}")
            }
        }
        ModelFamily::E5 if !text.starts_with("query: ") => format!("query: {text}"),
        _ => text.to_string(),
    }
}

/// Embedding generator backed by any [`EmbeddingModel`], with an in-memory
/// LRU layer in front of the metadata store's persisted cache so repeat
/// queries within a process never re-run inference (§9 cache-correctness
/// invariant).
pub struct EmbeddingService {
    model: Box<dyn EmbeddingModel>,
    model_name: String,
    family: ModelFamily,
    memory_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingService {
    pub fn new(model: Box<dyn EmbeddingModel>, model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        let family = model_family(&model_name);
        Self {
            model,
            model_name,
            family,
            memory_cache: Mutex::new(LruCache::new(NonZeroUsize::new(2048).expect("nonzero"))),
        }
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn embed_documents(
        &self,
        store: &MetadataStore,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let prepared: Vec<String> = texts
            .iter()
            .map(|t| prepare_document_text(self.family, t))
            .collect();
        self.embed_with_cache(store, &prepared)
    }

    pub fn embed_query(&self, store: &MetadataStore, query: &str) -> Result<Vec<f32>, EmbedderError> {
        let prepared = prepare_query_text(self.family, query.trim());
        let mut result = self.embed_with_cache(store, std::slice::from_ref(&prepared))?;
        Ok(result.remove(0))
    }

    /// Resolves each text's vector through memory cache, then persisted
    /// cache, then falls back to live inference for whatever's left,
    /// persisting newly computed vectors back to both tiers.
    fn embed_with_cache(
        &self,
        store: &MetadataStore,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = texts.iter().map(|t| hash_text(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();

        {
            let mut cache = self.memory_cache.lock().expect("embedding cache lock");
            for (i, key) in keys.iter().enumerate() {
                if let Some(vector) = cache.get(key) {
                    results[i] = Some(vector.clone());
                } else {
                    missing.push(i);
                }
            }
        }

        if !missing.is_empty() {
            let missing_keys: Vec<String> = missing.iter().map(|&i| keys[i].clone()).collect();
            let persisted = store
                .get_cached_embeddings(&missing_keys)
                .map_err(|e| EmbedderError::Inference(e.to_string()))?;

            let mut still_missing = Vec::new();
            for &i in &missing {
                if let Some(vector) = persisted.get(&keys[i]) {
                    results[i] = Some(vector.clone());
                    self.memory_cache
                        .lock()
                        .expect("embedding cache lock")
                        .put(keys[i].clone(), vector.clone());
                } else {
                    still_missing.push(i);
                }
            }

            if !still_missing.is_empty() {
                let to_encode: Vec<String> = still_missing.iter().map(|&i| texts[i].clone()).collect();
                let encoded = self.model.embed_batch(&to_encode)?;
                if encoded.len() != to_encode.len() {
                    return Err(EmbedderError::LengthMismatch {
                        keys: to_encode.len(),
                        texts: encoded.len(),
                    });
                }

                let mut to_persist: HashMap<String, Vec<f32>> = HashMap::new();
                for (&i, vector) in still_missing.iter().zip(encoded.into_iter()) {
                    self.memory_cache
                        .lock()
                        .expect("embedding cache lock")
                        .put(keys[i].clone(), vector.clone());
                    to_persist.insert(keys[i].clone(), vector.clone());
                    results[i] = Some(vector);
                }
                store
                    .upsert_cached_embeddings(&to_persist)
                    .map_err(|e| EmbedderError::Inference(e.to_string()))?;
            }
        }

        Ok(results.into_iter().map(|v| v.expect("resolved above")).collect())
    }
}

const MODEL_REPO: &str = "intfloat/e5-base-v2";
const MODEL_FILE: &str = "onnx/model.onnx";
const TOKENIZER_FILE: &str = "onnx/tokenizer.json";
const MODEL_DIM: usize = 768;

/// `EmbeddingModel` backed by a local ONNX Runtime session. Downloads the
/// model from HuggingFace Hub on first use and lazily builds the session.
pub struct OrtEmbeddingModel {
    session: OnceCell<Mutex<ort::session::Session>>,
    tokenizer: OnceCell<tokenizers::Tokenizer>,
    model_path: PathBuf,
    tokenizer_path: PathBuf,
    max_length: usize,
}

impl OrtEmbeddingModel {
    pub fn load() -> Result<Self, EmbedderError> {
        let (model_path, tokenizer_path) = ensure_model()?;
        Ok(Self {
            session: OnceCell::new(),
            tokenizer: OnceCell::new(),
            model_path,
            tokenizer_path,
            max_length: 512,
        })
    }

    fn session(&self) -> Result<std::sync::MutexGuard<'_, ort::session::Session>, EmbedderError> {
        let session = self.session.get_or_try_init(|| {
            ort::session::Session::builder()
                .map_err(|e| EmbedderError::ModelLoad(e.to_string()))?
                .commit_from_file(&self.model_path)
                .map_err(|e| EmbedderError::ModelLoad(e.to_string()))
                .map(Mutex::new)
        })?;
        Ok(session.lock().unwrap_or_else(|p| p.into_inner()))
    }

    fn tokenizer(&self) -> Result<&tokenizers::Tokenizer, EmbedderError> {
        self.tokenizer.get_or_try_init(|| {
            tokenizers::Tokenizer::from_file(&self.tokenizer_path)
                .map_err(|e| EmbedderError::ModelLoad(e.to_string()))
        })
    }
}

impl EmbeddingModel for OrtEmbeddingModel {
    fn dimension(&self) -> usize {
        MODEL_DIM
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        use ort::value::Tensor;

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer()?
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbedderError::Inference(e.to_string()))?;

        let input_ids: Vec<Vec<i64>> = encodings
            .iter()
            .map(|e| e.get_ids().iter().map(|&id| id as i64).collect())
            .collect();
        let attention_mask: Vec<Vec<i64>> = encodings
            .iter()
            .map(|e| e.get_attention_mask().iter().map(|&m| m as i64).collect())
            .collect();

        let max_len = input_ids.iter().map(|v| v.len()).max().unwrap_or(0).min(self.max_length);

        let input_ids_arr = pad_2d_i64(&input_ids, max_len);
        let attention_mask_arr = pad_2d_i64(&attention_mask, max_len);
        let token_type_ids_arr = Array2::<i64>::zeros((texts.len(), max_len));

        let input_ids_tensor = Tensor::from_array(input_ids_arr).map_err(|e| EmbedderError::Inference(e.to_string()))?;
        let attention_mask_tensor =
            Tensor::from_array(attention_mask_arr).map_err(|e| EmbedderError::Inference(e.to_string()))?;
        let token_type_ids_tensor =
            Tensor::from_array(token_type_ids_arr).map_err(|e| EmbedderError::Inference(e.to_string()))?;

        let mut session = self.session()?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            ])
            .map_err(|e| EmbedderError::Inference(e.to_string()))?;

        let (_shape, data) = outputs["last_hidden_state"]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::Inference(e.to_string()))?;

        let batch_size = texts.len();
        let seq_len = max_len;
        let mut results = Vec::with_capacity(batch_size);

        for (i, mask_vec) in attention_mask.iter().enumerate().take(batch_size) {
            let mut sum = vec![0.0f32; MODEL_DIM];
            let mut count = 0.0f32;

            for j in 0..seq_len {
                let mask = mask_vec.get(j).copied().unwrap_or(0) as f32;
                if mask > 0.0 {
                    count += mask;
                    let offset = i * seq_len * MODEL_DIM + j * MODEL_DIM;
                    for (k, sum_val) in sum.iter_mut().enumerate() {
                        *sum_val += data[offset + k] * mask;
                    }
                }
            }
            if count > 0.0 {
                for sum_val in &mut sum {
                    *sum_val /= count;
                }
            }
            results.push(normalize_l2(sum));
        }

        Ok(results)
    }
}

fn ensure_model() -> Result<(PathBuf, PathBuf), EmbedderError> {
    use hf_hub::api::sync::Api;

    let api = Api::new().map_err(|e| EmbedderError::ModelLoad(e.to_string()))?;
    let repo = api.model(MODEL_REPO.to_string());

    let model_path = repo.get(MODEL_FILE).map_err(|e| EmbedderError::ModelLoad(e.to_string()))?;
    let tokenizer_path = repo.get(TOKENIZER_FILE).map_err(|e| EmbedderError::ModelLoad(e.to_string()))?;

    Ok((model_path, tokenizer_path))
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

fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm_sq: f32 = v.iter().fold(0.0, |acc, &x| acc + x * x);
    if norm_sq > 0.0 {
        let inv_norm = 1.0 / norm_sq.sqrt();
        v.iter_mut().for_each(|x| *x *= inv_norm);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeModel {
        dim: usize,
    }

    impl EmbeddingModel for FakeModel {
        fn dimension(&self) -> usize {
            self.dim
        }
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32; self.dim]).collect())
        }
    }

    fn temp_store() -> (MetadataStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn document_prefix_applied_for_e5_family() {
        assert_eq!(prepare_document_text(ModelFamily::E5, "foo"), "passage: foo");
        assert_eq!(prepare_document_text(ModelFamily::Other, "foo"), "foo");
    }

    #[test]
    fn query_prefix_applied_per_family() {
        assert_eq!(prepare_query_text(ModelFamily::E5, "foo"), "query: foo");
        assert!(prepare_query_text(ModelFamily::Bge, "foo").starts_with("Represent this sentence"));
    }

    #[test]
    fn repeated_embed_query_hits_cache_without_recomputation() {
        let (store, _dir) = temp_store();
        let service = EmbeddingService::new(Box::new(FakeModel { dim: 4 }), "intfloat/e5-base-v2");
        let first = service.embed_query(&store, "find the parser").unwrap();
        let second = service.embed_query(&store, "find the parser").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn embed_documents_persists_to_metadata_store() {
        let (store, _dir) = temp_store();
        let service = EmbeddingService::new(Box::new(FakeModel { dim: 4 }), "intfloat/e5-base-v2");
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = service.embed_documents(&store, &texts).unwrap();
        assert_eq!(vectors.len(), 2);

        let key = hash_text("passage: alpha");
        let cached = store.get_cached_embeddings(&[key]).unwrap();
        assert_eq!(cached.len(), 1);
    }
}
