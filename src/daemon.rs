//! Per-repo service registry and request entry points: `index`/`query`/
//! `status`/`model_name` (§5), grounded on `xtrc.core.daemon.AinavDaemon`.
//!
//! Global singletons (embedding model, cross-encoder, LLM client, query
//! rewriter, reranker, summarizer) are built once from [`Settings`] and
//! shared across repos via `Arc`. Each optional singleton that fails to
//! build is logged and disabled rather than aborting startup, mirroring
//! the original's `_build_*` helpers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::chunker::ChunkBuilder;
use crate::config::{resolve_data_root, Settings};
use crate::embedder::{EmbeddingService, OrtEmbeddingModel};
use crate::error::AinavError;
use crate::heuristics::RankingHeuristics;
use crate::indexer::Indexer;
use crate::llm::{HttpLlmClient, Llm};
use crate::llm_reranker::LlmReranker;
use crate::models::{IndexStats, QueryOutcome, StatusStats};
use crate::query::QueryEngine;
use crate::reranker::{LocalReranker, OrtCrossEncoder};
use crate::rewrite::QueryRewriter;
use crate::scorer::HybridScorer;
use crate::store::MetadataStore;
use crate::summarizer::ChunkSummarizer;
use crate::vector_store::VectorStore;

/// Everything needed to index and query a single repository, lazily
/// built on first use and cached for the daemon's lifetime.
struct RepoServices {
    query_engine: QueryEngine,
    indexer: Indexer,
    metadata_store: Arc<MetadataStore>,
    vector_store: Arc<VectorStore>,
}

/// Long-lived, `Send + Sync` registry of per-repo services plus the
/// global singletons they share. One `Daemon` backs both the CLI (a
/// single call) and the HTTP surface (many concurrent calls).
pub struct Daemon {
    settings: Settings,
    embedding_service: Arc<EmbeddingService>,
    llm: Option<Arc<dyn Llm>>,
    local_reranker: Option<Arc<LocalReranker>>,
    repos: Mutex<HashMap<String, Arc<RepoServices>>>,
    repo_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Daemon {
    /// Builds the embedding model and every optional singleton from
    /// `settings`. Fails only if the embedding model itself can't load —
    /// every other capability degrades to disabled on failure.
    pub fn new(settings: Settings) -> Result<Self, AinavError> {
        let embedding_model = OrtEmbeddingModel::load().map_err(|e| AinavError::Internal(e.to_string()))?;
        let embedding_service = Arc::new(EmbeddingService::new(Box::new(embedding_model), settings.model_name.clone()));

        let llm = Self::build_llm(&settings);
        let local_reranker = Self::build_local_reranker(&settings);

        Ok(Self {
            settings,
            embedding_service,
            llm,
            local_reranker,
            repos: Mutex::new(HashMap::new()),
            repo_locks: Mutex::new(HashMap::new()),
        })
    }

    fn build_llm(settings: &Settings) -> Option<Arc<dyn Llm>> {
        let needs_llm = settings.use_llm_reranker || settings.summarize_on_index || settings.query_rewrite_enabled;
        if !needs_llm {
            return None;
        }
        match HttpLlmClient::new(
            settings.llm_base_url.clone(),
            settings.llm_api_key.clone(),
            settings.llm_model.clone(),
            Duration::from_secs_f64(settings.llm_timeout_seconds),
            settings.llm_cache_size,
        ) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn Llm>),
            Err(err) => {
                tracing::warn!(error = %err, "LLM client unavailable, disabling LLM-dependent features");
                None
            }
        }
    }

    fn build_local_reranker(settings: &Settings) -> Option<Arc<LocalReranker>> {
        if !settings.local_reranker_enabled {
            return None;
        }
        match OrtCrossEncoder::load() {
            Ok(model) => Some(Arc::new(LocalReranker::new(
                Box::new(model),
                true,
                settings.local_reranker_top_k,
                settings.llm_timeout_seconds,
            ))),
            Err(err) => {
                tracing::warn!(error = %err, "local cross-encoder unavailable, disabling local reranking");
                None
            }
        }
    }

    pub fn model_name(&self) -> &str {
        self.embedding_service.model_name()
    }

    fn resolve_repo_path(repo_path: &Path) -> Result<PathBuf, AinavError> {
        if !repo_path.is_dir() {
            return Err(AinavError::InvalidRepo {
                message: format!("repo path does not exist or is not a directory: {}", repo_path.display()),
            });
        }
        Ok(dunce::canonicalize(repo_path).unwrap_or_else(|_| repo_path.to_path_buf()))
    }

    fn repo_lock(&self, repo_key: &str) -> Arc<Mutex<()>> {
        self.repo_locks
            .lock()
            .expect("repo locks registry")
            .entry(repo_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lazily builds (or returns the cached) service bundle for `repo_key`.
    fn get_or_create_services(&self, repo_path: &Path, repo_key: &str) -> Result<Arc<RepoServices>, AinavError> {
        if let Some(existing) = self.repos.lock().expect("repo registry").get(repo_key) {
            return Ok(existing.clone());
        }

        let data_root = resolve_data_root(repo_path).map_err(|e| AinavError::Internal(e.to_string()))?;
        let metadata_store = Arc::new(MetadataStore::open(&data_root.join(&self.settings.sqlite_name))?);
        let vector_store = Arc::new(VectorStore::open(&data_root)?);

        let chunk_summarizer = if self.settings.summarize_on_index {
            self.llm.clone().map(|llm| {
                ChunkSummarizer::new(
                    metadata_store.clone(),
                    llm,
                    self.settings.effective_summary_model().to_string(),
                    self.settings.summary_max_chars,
                )
            })
        } else {
            None
        };

        let query_rewriter = if self.settings.query_rewrite_enabled {
            Some(QueryRewriter::new(
                self.llm.clone(),
                self.settings.effective_rewrite_model().to_string(),
                true,
            ))
        } else {
            None
        };

        let llm_reranker = if self.settings.use_llm_reranker {
            self.llm.clone().map(|llm| {
                LlmReranker::new(llm, self.settings.llm_model.clone(), self.settings.llm_threshold, 10)
            })
        } else {
            None
        };

        let query_engine = QueryEngine {
            metadata_store: metadata_store.clone(),
            embedding_service: self.embedding_service.clone(),
            vector_store: vector_store.clone(),
            scorer: HybridScorer::new(),
            query_rewriter,
            local_reranker: self.local_reranker.clone(),
            ranking_heuristics: Some(RankingHeuristics::new(
                self.settings.heuristic_route_boost,
                self.settings.heuristic_noise_penalty,
                self.settings.heuristic_intent_boost,
            )),
            llm_reranker,
        };

        let indexer = Indexer {
            metadata_store: metadata_store.clone(),
            vector_store: vector_store.clone(),
            embedding_service: self.embedding_service.clone(),
            chunk_builder: ChunkBuilder::default(),
            chunk_summarizer,
        };

        let services = Arc::new(RepoServices {
            query_engine,
            indexer,
            metadata_store,
            vector_store,
        });
        self.repos.lock().expect("repo registry").insert(repo_key.to_string(), services.clone());
        Ok(services)
    }

    pub fn index(&self, repo_path: &Path, rebuild: bool) -> Result<IndexStats, AinavError> {
        let repo_path = Self::resolve_repo_path(repo_path)?;
        let repo_key = repo_path.to_string_lossy().to_string();
        let services = self.get_or_create_services(&repo_path, &repo_key)?;

        let lock = self.repo_lock(&repo_key);
        let _guard = lock.lock().expect("per-repo index lock");
        services.indexer.index(&repo_path, rebuild)
    }

    pub fn query(&self, repo_path: &Path, query_text: &str, top_k: usize) -> Result<QueryOutcome, AinavError> {
        if query_text.trim().is_empty() {
            return Err(AinavError::InvalidQuery {
                message: "query must not be empty".to_string(),
            });
        }
        if !(1..=50).contains(&top_k) {
            return Err(AinavError::InvalidQuery {
                message: format!("top_k must be in [1, 50], got {top_k}"),
            });
        }

        let repo_path = Self::resolve_repo_path(repo_path)?;
        let repo_key = repo_path.to_string_lossy().to_string();
        let services = self.get_or_create_services(&repo_path, &repo_key)?;
        Ok(services.query_engine.query(&repo_path, query_text, top_k))
    }

    pub fn status(&self, repo_path: &Path) -> Result<StatusStats, AinavError> {
        let repo_path = Self::resolve_repo_path(repo_path)?;
        let repo_key = repo_path.to_string_lossy().to_string();
        let services = self.get_or_create_services(&repo_path, &repo_key)?;
        Ok(services.metadata_store.get_status(&repo_key)?)
    }
}
