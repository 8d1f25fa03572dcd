//! Incremental indexing pipeline: walk → diff hashes → parse → chunk →
//! optional summarize → embed → upsert (§4.8), grounded on
//! `xtrc.core.indexer.Indexer`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::chunker::ChunkBuilder;
use crate::embedder::EmbeddingService;
use crate::error::AinavError;
use crate::language::Language;
use crate::models::IndexStats;
use crate::parser::SymbolParser;
use crate::store::MetadataStore;
use crate::summarizer::{build_embedding_text, ChunkSummarizer};
use crate::vector_store::VectorStore;
use crate::walk::{detect_language, relative_posix_path, sha256_text, walk_source_files};

pub struct Indexer {
    pub metadata_store: Arc<MetadataStore>,
    pub vector_store: Arc<VectorStore>,
    pub embedding_service: Arc<EmbeddingService>,
    pub chunk_builder: ChunkBuilder,
    pub chunk_summarizer: Option<ChunkSummarizer>,
}

impl Indexer {
    /// Runs one indexing pass over `repo_path`. `rebuild` forces a full
    /// re-embed of every file regardless of stored content hashes.
    pub fn index(&self, repo_path: &Path, rebuild: bool) -> Result<IndexStats, AinavError> {
        let started = std::time::Instant::now();
        let repo_path = dunce::canonicalize(repo_path).unwrap_or_else(|_| repo_path.to_path_buf());
        let repo_key = repo_path.to_string_lossy().to_string();

        tracing::info!(repo = %repo_key, rebuild, "indexing started");

        let mut rebuild = rebuild;
        let vector_size = self.embedding_service.dimension();
        let recreated = self.vector_store.ensure_collection(&repo_key, vector_size)?;
        if recreated && !rebuild {
            tracing::warn!(repo = %repo_key, "vector collection dimension changed; forcing full rebuild");
            self.metadata_store.clear_repo(&repo_key)?;
            rebuild = true;
        } else if rebuild {
            self.vector_store.recreate_collection(&repo_key, vector_size)?;
            self.metadata_store.clear_repo(&repo_key)?;
        }

        let walked = walk_source_files(&repo_path).map_err(|e| AinavError::Internal(e.to_string()))?;
        let files_scanned = walked.len();

        let known_hashes = self.metadata_store.get_file_hashes(&repo_key)?;
        let mut seen_relative_paths: HashSet<String> = HashSet::new();

        let mut changed_files: Vec<(String, Language, String, String)> = Vec::new();
        for path in &walked {
            let Some(language) = detect_language(path) else { continue };
            let relative_path = relative_posix_path(&repo_path, path);
            seen_relative_paths.insert(relative_path.clone());

            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(file = %relative_path, error = %err, "skipping unreadable file");
                    continue;
                }
            };
            let file_hash = sha256_text(&content);

            let unchanged = known_hashes.get(&relative_path).map(|h| h == &file_hash).unwrap_or(false);
            if unchanged && !rebuild {
                continue;
            }
            changed_files.push((relative_path, language, file_hash, content));
        }

        let deleted_files: Vec<String> = known_hashes
            .keys()
            .filter(|path| !seen_relative_paths.contains(*path))
            .cloned()
            .collect();

        for file_path in &deleted_files {
            let chunk_ids = self.metadata_store.get_chunk_ids_for_file(&repo_key, file_path)?;
            self.vector_store.delete_file_chunks(&repo_key, &chunk_ids)?;
            self.metadata_store.delete_chunks_by_file(&repo_key, file_path)?;
        }
        if !deleted_files.is_empty() {
            self.metadata_store.delete_files(&repo_key, &deleted_files)?;
        }

        let mut chunks_indexed = 0usize;
        let mut files_indexed = 0usize;

        for (relative_path, language, file_hash, content) in &changed_files {
            let stale_ids = self.metadata_store.get_chunk_ids_for_file(&repo_key, relative_path)?;
            if !stale_ids.is_empty() {
                self.vector_store.delete_chunk_ids(&repo_key, &stale_ids)?;
                self.metadata_store.delete_chunks_by_file(&repo_key, relative_path)?;
            }

            let mut parser = SymbolParser::new();
            let symbols = parser.parse_symbols(*language, content);
            let mut chunks =
                self.chunk_builder
                    .build_chunks(&repo_key, relative_path, language.as_str(), file_hash, content, &symbols);

            if chunks.is_empty() {
                self.metadata_store.upsert_file_hash(&repo_key, relative_path, file_hash)?;
                continue;
            }

            if let Some(summarizer) = &self.chunk_summarizer {
                let (summaries, latency_ms) = summarizer.summarize_chunks(&chunks);
                tracing::debug!(file = %relative_path, summarized = summaries.len(), latency_ms, "chunk summaries applied");
                chunks = ChunkSummarizer::apply_summaries(chunks, &summaries);
            }

            let embedding_inputs: Vec<String> = chunks.iter().map(build_embedding_text).collect();
            let vectors = self.embedding_service.embed_documents(&self.metadata_store, &embedding_inputs)?;

            self.vector_store.upsert_chunks(&repo_key, &chunks, &vectors)?;
            self.metadata_store.upsert_chunks(&chunks)?;
            self.metadata_store.upsert_file_hash(&repo_key, relative_path, file_hash)?;

            chunks_indexed += chunks.len();
            files_indexed += 1;
        }

        self.metadata_store.set_repo_last_indexed(&repo_key)?;

        let stats = IndexStats {
            repo_path: repo_key.clone(),
            files_scanned,
            files_indexed,
            files_deleted: deleted_files.len(),
            chunks_indexed,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(repo = %repo_key, ?stats, "indexing finished");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingModel;
    use crate::error::EmbedderError;

    struct FakeModel;
    impl EmbeddingModel for FakeModel {
        fn dimension(&self) -> usize {
            3
        }
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    fn setup(dir: &Path) -> (Arc<MetadataStore>, Arc<VectorStore>, Arc<EmbeddingService>) {
        let store = Arc::new(MetadataStore::open(&dir.join("meta.db")).unwrap());
        let vector_store = Arc::new(VectorStore::open(dir).unwrap());
        let embedding_service = Arc::new(EmbeddingService::new(Box::new(FakeModel), "intfloat/e5-base-v2"));
        (store, vector_store, embedding_service)
    }

    #[test]
    fn indexes_new_files_and_skips_unchanged_on_second_run() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("app.py"), "def create_user():\n    pass\n").unwrap();

        let (store, vector_store, embedding_service) = setup(dir.path());
        let indexer = Indexer {
            metadata_store: store,
            vector_store,
            embedding_service,
            chunk_builder: ChunkBuilder::default(),
            chunk_summarizer: None,
        };

        let stats = indexer.index(&repo, false).unwrap();
        assert_eq!(stats.files_scanned, 1);
        assert_eq!(stats.files_indexed, 1);
        assert!(stats.chunks_indexed > 0);

        let stats_again = indexer.index(&repo, false).unwrap();
        assert_eq!(stats_again.files_indexed, 0, "unchanged file should be skipped");
        assert_eq!(stats_again.files_deleted, 0);
    }

    #[test]
    fn deleted_file_is_removed_from_both_stores() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let file = repo.join("app.py");
        std::fs::write(&file, "def create_user():\n    pass\n").unwrap();

        let (store, vector_store, embedding_service) = setup(dir.path());
        let indexer = Indexer {
            metadata_store: store.clone(),
            vector_store,
            embedding_service,
            chunk_builder: ChunkBuilder::default(),
            chunk_summarizer: None,
        };
        indexer.index(&repo, false).unwrap();

        std::fs::remove_file(&file).unwrap();
        let stats = indexer.index(&repo, false).unwrap();
        assert_eq!(stats.files_deleted, 1);

        let remaining = store.get_all_chunks(&repo.to_string_lossy()).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn rebuild_reindexes_unchanged_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("app.py"), "def create_user():\n    pass\n").unwrap();

        let (store, vector_store, embedding_service) = setup(dir.path());
        let indexer = Indexer {
            metadata_store: store,
            vector_store,
            embedding_service,
            chunk_builder: ChunkBuilder::default(),
            chunk_summarizer: None,
        };
        indexer.index(&repo, false).unwrap();
        let stats = indexer.index(&repo, true).unwrap();
        assert_eq!(stats.files_indexed, 1, "rebuild should reindex even unchanged files");
    }
}
