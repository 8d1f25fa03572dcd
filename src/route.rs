//! HTTP route signal extraction and query-side intent inference (§4.2).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::tokenizer::normalize_terms;

/// method -> CRUD intent.
pub fn http_intent(method: &str) -> Option<&'static str> {
    match method {
        "post" => Some("create"),
        "put" | "patch" => Some("update"),
        "delete" => Some("delete"),
        "get" => Some("read"),
        _ => None,
    }
}

static JS_ROUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\.\s*(get|post|put|delete|patch)\s*\(\s*['"]([^'"]+)['"]"#).expect("regex")
});
static PY_DECORATOR_ROUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)@[A-Za-z_][A-Za-z0-9_.]*(?:router|app)?\.?\s*(get|post|put|delete|patch)\s*\(\s*['"]([^'"]+)['"]"#)
        .expect("regex")
});
static GENERIC_METHOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(get|post|put|delete|patch)\b").expect("regex"));

/// Structured `(method, path, intent, resource)` tuple extracted from source text.
#[derive(Debug, Clone)]
pub struct RouteSignal {
    pub method: String,
    pub intent: String,
    pub resource: Option<String>,
    pub path: Option<String>,
    pub structural_terms: Vec<String>,
}

/// Query-side CRUD intents, HTTP verbs, and structural terms.
#[derive(Debug, Clone)]
pub struct QuerySignal {
    pub intents: Vec<String>,
    pub methods: Vec<String>,
    pub structural_terms: Vec<String>,
}

const INTENT_ALIASES: &[(&str, &[&str])] = &[
    ("create", &["create", "add", "new", "insert", "post", "register", "submit"]),
    ("update", &["update", "edit", "modify", "put", "patch", "change"]),
    ("delete", &["delete", "remove", "destroy", "drop"]),
    ("read", &["read", "get", "fetch", "find", "list", "show", "retrieve"]),
];

const STOP_TERMS: &[&str] = &[
    "the", "this", "that", "with", "from", "into", "where", "when", "which", "what", "does",
    "should", "route", "endpoint", "http", "api", "resource",
];

/// Search, in order: JS-style `.METHOD('/path'` calls, a Python decorator
/// route on the preceding line, then a bare METHOD token.
pub fn extract_route_signal(text: &str, symbol_name: Option<&str>) -> Option<RouteSignal> {
    let mut method: Option<String> = None;
    let mut path: Option<String> = None;

    if let Some(caps) = JS_ROUTE_RE.captures(text) {
        method = Some(caps[1].to_lowercase());
        path = Some(caps[2].to_string());
    } else if let Some(caps) = PY_DECORATOR_ROUTE_RE.captures(text) {
        method = Some(caps[1].to_lowercase());
        path = Some(caps[2].to_string());
    }

    if method.is_none() {
        if let Some(caps) = GENERIC_METHOD_RE.captures(text) {
            method = Some(caps[1].to_lowercase());
        }
    }

    let method = method?;
    let intent = http_intent(&method)?.to_string();

    let resource = match &path {
        Some(p) => extract_resource(p),
        None => resource_from_symbol(symbol_name),
    };

    let mut terms: BTreeSet<String> = BTreeSet::new();
    terms.insert(method.clone());
    terms.insert(intent.clone());
    if let Some(p) = &path {
        for segment in path_segments(p) {
            for tok in normalize_terms(&segment) {
                terms.insert(tok);
            }
        }
    }
    if let Some(r) = &resource {
        terms.insert(r.clone());
    }
    if let Some(name) = symbol_name {
        for tok in normalize_terms(name) {
            terms.insert(tok);
        }
    }

    Some(RouteSignal {
        method: method.to_uppercase(),
        intent,
        resource,
        path,
        structural_terms: terms.into_iter().collect(),
    })
}

/// Normalize the query and compute verb/intent/structural signals.
pub fn infer_query_signal(query: &str) -> QuerySignal {
    let terms = normalize_terms(query);
    let term_set: BTreeSet<&str> = terms.iter().map(|s| s.as_str()).collect();

    let methods: BTreeSet<String> = term_set
        .iter()
        .filter(|t| http_intent(t).is_some())
        .map(|t| t.to_string())
        .collect();

    let mut intents: BTreeSet<String> = BTreeSet::new();
    for (intent, aliases) in INTENT_ALIASES {
        if term_set.iter().any(|t| aliases.contains(t)) {
            intents.insert(intent.to_string());
        }
    }
    for method in &methods {
        if let Some(mapped) = http_intent(method) {
            intents.insert(mapped.to_string());
        }
    }

    let mut structural: BTreeSet<String> = term_set
        .iter()
        .filter(|t| !STOP_TERMS.contains(t))
        .map(|t| t.to_string())
        .collect();
    structural.extend(methods.iter().cloned());
    structural.extend(intents.iter().cloned());

    QuerySignal {
        intents: intents.into_iter().collect(),
        methods: methods.into_iter().collect(),
        structural_terms: structural.into_iter().collect(),
    }
}

fn path_segments(path: &str) -> Vec<String> {
    let mut normalized = path.trim();
    if normalized.starts_with("http://") || normalized.starts_with("https://") {
        if let Some(idx) = normalized.find("//") {
            normalized = &normalized[idx + 2..];
        }
        normalized = match normalized.find('/') {
            Some(idx) => &normalized[idx..],
            None => "",
        };
    }
    normalized
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .filter(|s| !s.starts_with(':'))
        .filter(|s| !(s.starts_with('{') && s.ends_with('}')))
        .map(|s| s.to_string())
        .collect()
}

fn extract_resource(path: &str) -> Option<String> {
    let segments = path_segments(path);
    let candidate = segments.first()?;
    let tokens = normalize_terms(candidate);
    let first = tokens.first()?;
    Some(singularize(first))
}

fn resource_from_symbol(symbol_name: Option<&str>) -> Option<String> {
    let name = symbol_name?;
    let tokens = normalize_terms(name);
    for token in tokens {
        if matches!(
            token.as_str(),
            "create" | "update" | "delete" | "get" | "post" | "put" | "patch"
        ) {
            continue;
        }
        return Some(singularize(&token));
    }
    None
}

fn singularize(value: &str) -> String {
    if value.ends_with("ies") && value.len() > 4 {
        return format!("{}y", &value[..value.len() - 3]);
    }
    if value.ends_with('s') && !value.ends_with("ss") && value.len() > 3 {
        return value[..value.len() - 1].to_string();
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_js_post_route() {
        let signal =
            extract_route_signal("router.post('/posts', createPostHandler)", Some("POST /posts"))
                .unwrap();
        assert_eq!(signal.method, "POST");
        assert_eq!(signal.intent, "create");
        assert_eq!(signal.path.as_deref(), Some("/posts"));
        assert_eq!(signal.resource.as_deref(), Some("post"));
    }

    #[test]
    fn singularizes_plural_resource_segment() {
        let signal = extract_route_signal("app.get('/categories')", None).unwrap();
        assert_eq!(signal.resource.as_deref(), Some("category"));
    }

    #[test]
    fn skips_parametric_path_segments() {
        let signal = extract_route_signal("router.delete('/posts/:id')", None).unwrap();
        assert_eq!(signal.resource.as_deref(), Some("post"));
    }

    #[test]
    fn no_method_returns_none() {
        assert!(extract_route_signal("const x = 1;", None).is_none());
    }

    #[test]
    fn query_signal_infers_create_intent_from_alias() {
        let signal = infer_query_signal("function to create new posts");
        assert!(signal.intents.contains(&"create".to_string()));
    }
}
