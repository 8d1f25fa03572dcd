//! Per-chunk intent tagging: route detection, CRUD hints, and noise-path
//! classification (§3/§4.2).

use std::collections::BTreeSet;

use crate::models::canonicalize;
use crate::route::extract_route_signal;
use crate::tokenizer::normalize_terms;

const NOISE_PATH_HINTS: &[&str] = &[
    "seed", "seeds", "migration", "migrations", "fixture", "fixtures", "dummy", "mock", "test",
    "tests", "spec", "script", "scripts",
];

const LOGGING_HINTS: &[&str] = &["log", "logger", "logging", "audit", "trace"];
const ANALYTICS_HINTS: &[&str] =
    &["analytics", "metric", "metrics", "telemetry", "tracking", "event"];

const CREATE_HINTS: &[&str] = &["create", "insert", "add", "register", "new", "post"];
const UPDATE_HINTS: &[&str] = &["update", "modify", "edit", "patch", "put", "upsert"];
const DELETE_HINTS: &[&str] = &["delete", "remove", "destroy", "drop"];
const READ_HINTS: &[&str] = &["get", "fetch", "read", "list", "find", "retrieve", "query"];

/// Derived intent/route metadata attached to a chunk at build time.
#[derive(Debug, Clone)]
pub struct IntentMetadata {
    pub intent_tags: Vec<String>,
    pub route_method: Option<String>,
    pub route_path: Option<String>,
    pub route_intent: Option<String>,
    pub route_resource: Option<String>,
    pub structural_terms: Vec<String>,
    pub is_route_handler: bool,
}

/// `text` is truncated to its first 8000 characters before term extraction,
/// matching the original's `text[:8000]` budget to bound cost on huge chunks.
pub fn extract_intent_metadata(
    file_path: &str,
    symbol_kind: Option<&str>,
    symbol: Option<&str>,
    text: &str,
) -> IntentMetadata {
    let truncated: String = text.chars().take(8000).collect();
    let combined = format!("{}\n{}\n{}", file_path, symbol.unwrap_or(""), truncated);
    let terms: BTreeSet<String> = normalize_terms(&combined).into_iter().collect();

    let route_signal = extract_route_signal(text, symbol);
    let route_method = route_signal.as_ref().map(|r| r.method.clone());
    let route_path = route_signal.as_ref().and_then(|r| r.path.clone());
    let route_intent = route_signal.as_ref().map(|r| r.intent.clone());
    let route_resource = route_signal.as_ref().and_then(|r| r.resource.clone());

    let mut tags: BTreeSet<String> = BTreeSet::new();
    if let Some(intent) = &route_intent {
        tags.insert(format!("{intent}_resource"));
    }

    let lower_path = file_path.to_lowercase();
    let has_noise_path = NOISE_PATH_HINTS.iter().any(|h| lower_path.contains(h))
        || has_any_set(&terms, &["fixture", "fixtures", "mock"]);
    if has_noise_path {
        if lower_path.contains("seed") {
            tags.insert("seed_data".to_string());
        }
        if lower_path.contains("migration") {
            tags.insert("migration_script".to_string());
        }
        if ["test", "tests", "spec"].iter().any(|h| lower_path.contains(h)) {
            tags.insert("test_script".to_string());
        }
        if ["script", "scripts"].iter().any(|h| lower_path.contains(h)) {
            tags.insert("script".to_string());
        }
    }

    if has_any_set(&terms, LOGGING_HINTS) {
        tags.insert("logging".to_string());
    }
    if has_any_set(&terms, ANALYTICS_HINTS) {
        tags.insert("analytics".to_string());
    }
    if has_any_set(&terms, CREATE_HINTS) {
        tags.insert("create_resource".to_string());
    }
    if has_any_set(&terms, UPDATE_HINTS) {
        tags.insert("update_resource".to_string());
    }
    if has_any_set(&terms, DELETE_HINTS) {
        tags.insert("delete_resource".to_string());
    }
    if has_any_set(&terms, READ_HINTS) {
        tags.insert("read_resource".to_string());
    }
    if route_signal.is_some() {
        tags.insert("route_handler".to_string());
    }

    let mut structural_terms: BTreeSet<String> = terms;
    if let Some(signal) = &route_signal {
        structural_terms.extend(signal.structural_terms.iter().cloned());
        structural_terms.insert(signal.method.to_lowercase());
        structural_terms.insert(signal.intent.to_lowercase());
        if let Some(resource) = &signal.resource {
            structural_terms.extend(normalize_terms(resource));
        }
    }

    let is_route_handler = route_signal.is_some() || symbol_kind == Some("route");

    IntentMetadata {
        intent_tags: canonicalize(tags.into_iter().collect()),
        route_method,
        route_path,
        route_intent,
        route_resource,
        structural_terms: canonicalize(structural_terms.into_iter().collect()),
        is_route_handler,
    }
}

fn has_any_set(values: &BTreeSet<String>, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| values.contains(*c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_route_handler_and_resource_intent() {
        let meta = extract_intent_metadata(
            "src/routes/posts.js",
            None,
            Some("createPost"),
            "router.post('/posts', createPost)",
        );
        assert!(meta.is_route_handler);
        assert!(meta.intent_tags.contains(&"route_handler".to_string()));
        assert!(meta.intent_tags.contains(&"create_resource".to_string()));
        assert_eq!(meta.route_resource.as_deref(), Some("post"));
    }

    #[test]
    fn tags_test_script_from_noise_path() {
        let meta = extract_intent_metadata("tests/test_auth.py", None, None, "def test_login(): pass");
        assert!(meta.intent_tags.contains(&"test_script".to_string()));
    }

    #[test]
    fn tags_migration_script_from_path() {
        let meta =
            extract_intent_metadata("db/migrations/0001_init.sql", None, None, "CREATE TABLE users();");
        assert!(meta.intent_tags.contains(&"migration_script".to_string()));
    }

    #[test]
    fn tags_logging_from_term_hints() {
        let meta = extract_intent_metadata(
            "src/util/logger.py",
            None,
            Some("log_event"),
            "def log_event(msg): logger.info(msg)",
        );
        assert!(meta.intent_tags.contains(&"logging".to_string()));
    }

    #[test]
    fn non_route_plain_function_has_no_route_tags() {
        let meta = extract_intent_metadata("src/math.py", None, Some("add"), "def add(a, b): return a + b");
        assert!(!meta.is_route_handler);
        assert!(meta.route_method.is_none());
    }
}
