//! Environment-driven runtime configuration (§6), grounded on
//! `xtrc.config.Settings`. Every knob has a hardcoded default; malformed
//! env values are logged and the default is kept rather than failing
//! startup.

use std::path::{Path, PathBuf};

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Runtime configuration for the indexer, query engine, and HTTP/CLI
/// surfaces. Loaded once via [`Settings::from_env`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub model_name: String,
    pub qdrant_dirname: String,
    pub sqlite_name: String,
    pub max_batch_size: usize,

    pub use_llm_reranker: bool,
    pub llm_model: String,
    pub llm_threshold: f64,
    pub llm_timeout_seconds: f64,
    pub llm_enable_rewrite: bool,
    pub llm_cache_size: usize,

    pub llm_base_url: String,
    pub llm_api_key: String,

    pub summarize_on_index: bool,
    pub summary_model: String,
    pub summary_max_chars: usize,

    pub query_rewrite_enabled: bool,
    pub query_rewrite_model: String,

    pub local_reranker_enabled: bool,
    pub local_reranker_model: String,
    pub local_reranker_top_k: usize,

    pub heuristic_route_boost: f64,
    pub heuristic_noise_penalty: f64,
    pub heuristic_intent_boost: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            model_name: "intfloat/e5-base-v2".to_string(),
            qdrant_dirname: "qdrant".to_string(),
            sqlite_name: "metadata.db".to_string(),
            max_batch_size: 256,

            use_llm_reranker: false,
            llm_model: "gpt-4o-mini".to_string(),
            llm_threshold: 0.85,
            llm_timeout_seconds: 2.0,
            llm_enable_rewrite: false,
            llm_cache_size: 128,

            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: String::new(),

            summarize_on_index: false,
            summary_model: String::new(),
            summary_max_chars: 320,

            query_rewrite_enabled: false,
            query_rewrite_model: String::new(),

            local_reranker_enabled: false,
            local_reranker_model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            local_reranker_top_k: 10,

            heuristic_route_boost: 1.3,
            heuristic_noise_penalty: 0.7,
            heuristic_intent_boost: 1.2,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let settings = Self {
            host: env_string("AINAV_HOST", &defaults.host),
            port: env_usize("AINAV_PORT", defaults.port as usize) as u16,
            model_name: env_string("AINAV_MODEL", &defaults.model_name),
            qdrant_dirname: defaults.qdrant_dirname.clone(),
            sqlite_name: defaults.sqlite_name.clone(),
            max_batch_size: env_usize("AINAV_MAX_BATCH_SIZE", defaults.max_batch_size).max(1),

            use_llm_reranker: env_bool("USE_LLM_RERANKER", defaults.use_llm_reranker),
            llm_model: env_string("LLM_MODEL", &defaults.llm_model),
            llm_threshold: env_f64("LLM_RERANK_THRESHOLD", defaults.llm_threshold).clamp(0.0, 1.0),
            llm_timeout_seconds: env_f64("LLM_TIMEOUT_SECONDS", defaults.llm_timeout_seconds).max(0.1),
            llm_enable_rewrite: env_bool("LLM_ENABLE_REWRITE", defaults.llm_enable_rewrite),
            llm_cache_size: env_usize("LLM_CACHE_SIZE", defaults.llm_cache_size).max(1),

            llm_base_url: env_string("LLM_BASE_URL", &defaults.llm_base_url),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),

            summarize_on_index: env_bool("LLM_SUMMARIZE_ON_INDEX", defaults.summarize_on_index),
            summary_model: env_string("LLM_SUMMARY_MODEL", &defaults.summary_model),
            summary_max_chars: env_usize("LLM_SUMMARY_MAX_CHARS", defaults.summary_max_chars).max(64),

            query_rewrite_enabled: env_bool("QUERY_REWRITE_ENABLED", defaults.query_rewrite_enabled),
            query_rewrite_model: env_string("QUERY_REWRITE_MODEL", &defaults.query_rewrite_model),

            local_reranker_enabled: env_bool("LOCAL_RERANKER_ENABLED", defaults.local_reranker_enabled),
            local_reranker_model: env_string("LOCAL_RERANKER_MODEL", &defaults.local_reranker_model),
            local_reranker_top_k: env_usize("LOCAL_RERANKER_TOP_K", defaults.local_reranker_top_k).max(1),

            heuristic_route_boost: env_f64("HEURISTIC_ROUTE_BOOST", defaults.heuristic_route_boost).max(0.1),
            heuristic_noise_penalty: env_f64("HEURISTIC_NOISE_PENALTY", defaults.heuristic_noise_penalty).max(0.1),
            heuristic_intent_boost: env_f64("HEURISTIC_INTENT_BOOST", defaults.heuristic_intent_boost).max(0.1),
        };

        tracing::debug!(
            host = %settings.host,
            port = settings.port,
            model = %settings.model_name,
            use_llm_reranker = settings.use_llm_reranker,
            local_reranker_enabled = settings.local_reranker_enabled,
            "effective settings"
        );
        settings
    }

    pub fn effective_summary_model(&self) -> &str {
        if self.summary_model.is_empty() {
            &self.llm_model
        } else {
            &self.summary_model
        }
    }

    pub fn effective_rewrite_model(&self) -> &str {
        if self.query_rewrite_model.is_empty() {
            &self.llm_model
        } else {
            &self.query_rewrite_model
        }
    }
}

/// Resolves a repo's on-disk data root: `$AINAV_DATA_ROOT` if set, else
/// `<repo>/.xtrc`, creating it if missing, per `xtrc.config.resolve_data_root`.
pub fn resolve_data_root(repo_path: &Path) -> std::io::Result<PathBuf> {
    let root = match std::env::var("AINAV_DATA_ROOT") {
        Ok(raw) if !raw.trim().is_empty() => {
            dunce::canonicalize(Path::new(raw.trim())).unwrap_or_else(|_| PathBuf::from(raw.trim()))
        }
        _ => repo_path.join(".xtrc"),
    };
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn from_env_falls_back_to_defaults_when_unset() {
        for key in ["AINAV_PORT", "LLM_RERANK_THRESHOLD", "LOCAL_RERANKER_TOP_K"] {
            std::env::remove_var(key);
        }
        let settings = Settings::from_env();
        assert_eq!(settings.port, 8765);
        assert_eq!(settings.llm_threshold, 0.85);
        assert_eq!(settings.local_reranker_top_k, 10);
    }

    #[test]
    #[serial]
    fn from_env_clamps_out_of_range_threshold() {
        std::env::set_var("LLM_RERANK_THRESHOLD", "5.0");
        let settings = Settings::from_env();
        assert_eq!(settings.llm_threshold, 1.0);
        std::env::remove_var("LLM_RERANK_THRESHOLD");
    }

    #[test]
    #[serial]
    fn from_env_ignores_malformed_numeric_value() {
        std::env::set_var("AINAV_PORT", "not-a-number");
        let settings = Settings::from_env();
        assert_eq!(settings.port, 8765);
        std::env::remove_var("AINAV_PORT");
    }

    #[test]
    fn resolve_data_root_defaults_to_dotxtrc_under_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::env::remove_var("AINAV_DATA_ROOT");
        let root = resolve_data_root(dir.path()).unwrap();
        assert_eq!(root, dir.path().join(".xtrc"));
        assert!(root.exists());
    }
}
