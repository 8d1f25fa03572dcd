//! Local HNSW vector index, one per repository, addressed by a
//! `qdrant/ainav_<sha1 prefix>/` directory exactly as spec §6 names it
//! (the name is a holdover from the original's Qdrant backend; the actual
//! engine here is `hnsw_rs`, the teacher's own vector-search crate).
//!
//! Unlike the teacher's `hnsw/` module, this keeps every vector owned in a
//! plain `Vec` and rebuilds the `Hnsw` graph from that array on load,
//! rather than the teacher's zero-copy mmap + `unsafe impl Send`/`self_cell`
//! lifetime-extension trick — safer to hand-write without a compiler to
//! check the unsafety against, at the cost of an extra copy on load.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use hnsw_rs::anndists::dist::distances::DistCosine;
use hnsw_rs::hnsw::Hnsw;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::error::VectorStoreError;
use crate::models::CodeChunk;

const MAX_NB_CONNECTION: usize = 24;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;

/// One ranked hit from a vector search: chunk id, cosine similarity, and
/// the stored payload fields needed for the hybrid scorer.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f64,
}

struct Collection {
    dimension: usize,
    chunk_ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

/// Per-repo collections live under `qdrant/` in the repo's data root (§6).
pub struct VectorStore {
    root: PathBuf,
    collections: std::sync::Mutex<HashMap<String, Collection>>,
}

impl VectorStore {
    pub fn open(data_root: &Path) -> Result<Self, VectorStoreError> {
        let root = data_root.join("qdrant");
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            collections: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// `ainav_<sha1(repo_path)[:20]>`, matching the original's literal
    /// collection-naming scheme.
    pub fn collection_name(repo_path: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(repo_path.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("ainav_{}", &digest[..20])
    }

    /// Stable UUIDv5 point id derived from the chunk id, mirroring the
    /// original's need to satisfy Qdrant's UUID/int point-id constraint —
    /// kept even though `hnsw_rs` has no such restriction, so that on-disk
    /// point identity stays stable across a future backend swap.
    pub fn point_id(chunk_id: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, chunk_id.as_bytes())
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn load_collection(&self, name: &str) -> Option<Collection> {
        let dir = self.collection_path(name);
        let meta_path = dir.join("meta.json");
        let vectors_path = dir.join("vectors.bin");
        let meta_raw = fs::read_to_string(&meta_path).ok()?;
        let meta: CollectionMeta = serde_json::from_str(&meta_raw).ok()?;
        let bytes = fs::read(&vectors_path).ok()?;
        let vectors = bytes
            .chunks_exact(meta.dimension * 4)
            .map(|chunk| {
                chunk
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect()
            })
            .collect();
        Some(Collection {
            dimension: meta.dimension,
            chunk_ids: meta.chunk_ids,
            vectors,
        })
    }

    fn persist_collection(&self, name: &str, collection: &Collection) -> Result<(), VectorStoreError> {
        let dir = self.collection_path(name);
        fs::create_dir_all(&dir)?;
        let meta = CollectionMeta {
            dimension: collection.dimension,
            chunk_ids: collection.chunk_ids.clone(),
        };
        fs::write(dir.join("meta.json"), serde_json::to_vec(&meta).unwrap_or_default())?;
        let mut bytes = Vec::with_capacity(collection.vectors.len() * collection.dimension * 4);
        for vector in &collection.vectors {
            for f in vector {
                bytes.extend_from_slice(&f.to_le_bytes());
            }
        }
        fs::write(dir.join("vectors.bin"), bytes)?;
        Ok(())
    }

    /// Create the collection if absent, or recreate it if its stored
    /// dimension doesn't match `vector_size`. Returns whether a
    /// (re)creation happened.
    pub fn ensure_collection(&self, repo_path: &str, vector_size: usize) -> Result<bool, VectorStoreError> {
        let name = Self::collection_name(repo_path);
        let mut collections = self.collections.lock().expect("vector store lock");

        if let Some(existing) = collections.get(&name) {
            if existing.dimension == vector_size {
                return Ok(false);
            }
        } else if let Some(loaded) = self.load_collection(&name) {
            let dim = loaded.dimension;
            collections.insert(name.clone(), loaded);
            if dim == vector_size {
                return Ok(false);
            }
        }

        collections.insert(
            name.clone(),
            Collection {
                dimension: vector_size,
                chunk_ids: Vec::new(),
                vectors: Vec::new(),
            },
        );
        self.persist_collection(&name, collections.get(&name).unwrap())?;
        Ok(true)
    }

    /// Unconditionally wipes a collection's vectors, for a forced reindex
    /// (`rebuild=true`) where the stored dimension already matches and
    /// `ensure_collection` would otherwise be a no-op.
    pub fn recreate_collection(&self, repo_path: &str, vector_size: usize) -> Result<(), VectorStoreError> {
        let name = Self::collection_name(repo_path);
        let mut collections = self.collections.lock().expect("vector store lock");
        collections.insert(
            name.clone(),
            Collection {
                dimension: vector_size,
                chunk_ids: Vec::new(),
                vectors: Vec::new(),
            },
        );
        self.persist_collection(&name, collections.get(&name).unwrap())
    }

    pub fn upsert_chunks(
        &self,
        repo_path: &str,
        chunks: &[CodeChunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), VectorStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let dim = vectors[0].len();
        self.ensure_collection(repo_path, dim)?;

        let name = Self::collection_name(repo_path);
        let mut collections = self.collections.lock().expect("vector store lock");
        let collection = collections.get_mut(&name).expect("just ensured");

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            if let Some(pos) = collection.chunk_ids.iter().position(|id| id == &chunk.chunk_id) {
                collection.vectors[pos] = vector.clone();
            } else {
                collection.chunk_ids.push(chunk.chunk_id.clone());
                collection.vectors.push(vector.clone());
            }
        }

        self.persist_collection(&name, collection)
    }

    pub fn delete_chunk_ids(&self, repo_path: &str, chunk_ids: &[String]) -> Result<(), VectorStoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let name = Self::collection_name(repo_path);
        let mut collections = self.collections.lock().expect("vector store lock");
        let Some(collection) = self.collection_mut(&mut collections, &name) else {
            return Ok(());
        };
        let to_remove: std::collections::HashSet<&String> = chunk_ids.iter().collect();
        let keep: Vec<usize> = collection
            .chunk_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| !to_remove.contains(id))
            .map(|(i, _)| i)
            .collect();
        collection.chunk_ids = keep.iter().map(|&i| collection.chunk_ids[i].clone()).collect();
        collection.vectors = keep.iter().map(|&i| collection.vectors[i].clone()).collect();
        self.persist_collection(&name, collection)
    }

    pub fn delete_file_chunks(
        &self,
        repo_path: &str,
        file_chunk_ids: &[String],
    ) -> Result<(), VectorStoreError> {
        self.delete_chunk_ids(repo_path, file_chunk_ids)
    }

    fn collection_mut<'a>(
        &self,
        collections: &'a mut HashMap<String, Collection>,
        name: &str,
    ) -> Option<&'a mut Collection> {
        if !collections.contains_key(name) {
            if let Some(loaded) = self.load_collection(name) {
                collections.insert(name.to_string(), loaded);
            }
        }
        collections.get_mut(name)
    }

    /// Dimension-checked similarity search. Raises `DimensionMismatch`
    /// rather than silently truncating or padding when the stored
    /// collection's dimension disagrees with the query model's (§4.6).
    pub fn search(
        &self,
        repo_path: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let name = Self::collection_name(repo_path);
        let mut collections = self.collections.lock().expect("vector store lock");
        let Some(collection) = self.collection_mut(&mut collections, &name) else {
            return Ok(Vec::new());
        };

        if collection.dimension != query_vector.len() {
            return Err(VectorStoreError::DimensionMismatch {
                index_dim: collection.dimension,
                model_dim: query_vector.len(),
            });
        }

        if collection.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let nb_elem = collection.vectors.len();
        let hnsw: Hnsw<f32, DistCosine> =
            Hnsw::new(MAX_NB_CONNECTION, nb_elem, MAX_LAYER, EF_CONSTRUCTION, DistCosine);
        let data_for_insert: Vec<(&Vec<f32>, usize)> =
            collection.vectors.iter().enumerate().map(|(i, v)| (v, i)).collect();
        hnsw.parallel_insert_data(&data_for_insert);

        let ef_search = EF_SEARCH.max(limit * 2).min(nb_elem.max(EF_SEARCH));
        let neighbors = hnsw.search_neighbours(query_vector, limit, ef_search);

        Ok(neighbors
            .into_iter()
            .filter_map(|n| {
                collection.chunk_ids.get(n.d_id).map(|id| SearchHit {
                    chunk_id: id.clone(),
                    score: 1.0 - n.distance as f64,
                })
            })
            .collect())
    }

    pub fn count_chunks(&self, repo_path: &str) -> usize {
        let name = Self::collection_name(repo_path);
        let mut collections = self.collections.lock().expect("vector store lock");
        self.collection_mut(&mut collections, &name)
            .map(|c| c.chunk_ids.len())
            .unwrap_or(0)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CollectionMeta {
    dimension: usize,
    chunk_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeChunk, SymbolKind};

    fn chunk(id: &str) -> CodeChunk {
        CodeChunk {
            chunk_id: id.to_string(),
            repo_path: "/repo".to_string(),
            file_path: "a.py".to_string(),
            language: "python".to_string(),
            start_line: 1,
            end_line: 1,
            symbol: None,
            symbol_kind: Some(SymbolKind::Function.as_str().to_string()),
            description: String::new(),
            text: String::new(),
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
        }
    }

    #[test]
    fn collection_name_is_stable_and_prefixed() {
        let name = VectorStore::collection_name("/repo/a");
        assert!(name.starts_with("ainav_"));
        assert_eq!(name, VectorStore::collection_name("/repo/a"));
    }

    #[test]
    fn upsert_then_search_finds_nearest_vector() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        let chunks = vec![chunk("c1"), chunk("c2")];
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        store.upsert_chunks("/repo", &chunks, &vectors).unwrap();

        let hits = store.search("/repo", &[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[test]
    fn search_with_wrong_dimension_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        store.upsert_chunks("/repo", &[chunk("c1")], &[vec![1.0, 0.0]]).unwrap();
        let result = store.search("/repo", &[1.0, 0.0, 0.0], 1);
        assert!(matches!(result, Err(VectorStoreError::DimensionMismatch { .. })));
    }

    #[test]
    fn delete_chunk_ids_removes_from_search_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        store
            .upsert_chunks("/repo", &[chunk("c1"), chunk("c2")], &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        store.delete_chunk_ids("/repo", &["c1".to_string()]).unwrap();
        assert_eq!(store.count_chunks("/repo"), 1);
    }
}
