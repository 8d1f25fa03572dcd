//! Query-aware score multipliers layered on top of the hybrid score
//! (§4.8), grounded on `xtrc.ranking.heuristics.RankingHeuristics`.

use std::collections::HashSet;

use crate::models::CodeChunk;
use crate::route::infer_query_signal;
use crate::tokenizer::normalize_terms;

const ROUTE_QUERY_HINTS: &[&str] = &["create", "post", "api", "endpoint", "route"];
const NEGATIVE_INTENTS: &[&str] = &["seed_data", "migration_script", "test_script", "script"];

/// Outcome of evaluating one chunk against a query: the multiplier to
/// apply to its hybrid score, plus the evidence behind it for the
/// result's `explanation` string.
#[derive(Debug, Clone, Default)]
pub struct HeuristicDecision {
    pub multiplier: f64,
    pub matched_intents: Vec<String>,
    pub matched_keywords: Vec<String>,
    pub reasons: Vec<String>,
}

pub struct RankingHeuristics {
    route_boost: f64,
    noise_penalty: f64,
    intent_boost: f64,
}

impl RankingHeuristics {
    pub fn new(route_boost: f64, noise_penalty: f64, intent_boost: f64) -> Self {
        Self {
            route_boost: route_boost.max(0.1),
            noise_penalty: noise_penalty.max(0.1),
            intent_boost: intent_boost.max(0.1),
        }
    }

    pub fn evaluate(&self, query: &str, chunk: &CodeChunk) -> HeuristicDecision {
        let query_terms: HashSet<String> = normalize_terms(query).into_iter().collect();
        let query_signal = infer_query_signal(query);

        let mut multiplier = 1.0;
        let mut reasons = Vec::new();

        let matched_intents = matched_intents(&query_signal.intents, &chunk.intent_tags);
        if !matched_intents.is_empty() {
            multiplier *= self.intent_boost;
            reasons.push(format!("intent match: {}", matched_intents.join(", ")));
        }

        if query_terms.iter().any(|t| ROUTE_QUERY_HINTS.contains(&t.as_str())) && is_route_chunk(chunk) {
            multiplier *= self.route_boost;
            reasons.push("route handler boost".to_string());
        }

        if chunk.intent_tags.iter().any(|tag| NEGATIVE_INTENTS.contains(&tag.as_str())) {
            multiplier *= self.noise_penalty;
            reasons.push("noise/script penalty".to_string());
        }

        let matched_keywords = matched_keywords(&query_terms, chunk);

        HeuristicDecision {
            multiplier,
            matched_intents,
            matched_keywords,
            reasons,
        }
    }
}

fn is_route_chunk(chunk: &CodeChunk) -> bool {
    chunk.route_method.is_some()
        || chunk.intent_tags.iter().any(|t| t == "route_handler")
        || chunk.symbol_kind.as_deref() == Some("route")
}

fn matched_intents(query_intents: &[String], tags: &[String]) -> Vec<String> {
    if query_intents.is_empty() {
        return Vec::new();
    }
    let tag_set: HashSet<&String> = tags.iter().collect();
    let mut matched: Vec<String> = query_intents
        .iter()
        .map(|intent| format!("{intent}_resource"))
        .filter(|key| tag_set.contains(key))
        .collect();
    matched.sort();
    matched.dedup();
    matched
}

fn matched_keywords(query_terms: &HashSet<String>, chunk: &CodeChunk) -> Vec<String> {
    let mut candidates: HashSet<String> = chunk.keywords.iter().cloned().collect();
    candidates.extend(chunk.symbol_terms.iter().cloned());
    candidates.extend(chunk.structural_terms.iter().cloned());
    if let Some(method) = &chunk.route_method {
        candidates.insert(method.to_lowercase());
    }
    if let Some(resource) = &chunk.route_resource {
        candidates.extend(normalize_terms(resource));
    }
    let mut overlap: Vec<String> = query_terms.intersection(&candidates).cloned().collect();
    overlap.sort();
    overlap.truncate(8);
    overlap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SymbolKind;

    fn chunk_with(intent_tags: Vec<String>, route_method: Option<&str>) -> CodeChunk {
        CodeChunk {
            chunk_id: "c1".to_string(),
            repo_path: "/repo".to_string(),
            file_path: "a.py".to_string(),
            language: "python".to_string(),
            start_line: 1,
            end_line: 2,
            symbol: None,
            symbol_kind: Some(SymbolKind::Route.as_str().to_string()),
            description: String::new(),
            text: String::new(),
            content_hash: "h".to_string(),
            tokens: 1,
            keywords: vec![],
            symbol_terms: vec![],
            structural_terms: vec![],
            intent_tags,
            route_method: route_method.map(|s| s.to_string()),
            route_path: None,
            route_intent: None,
            route_resource: None,
            llm_summary: None,
        }
    }

    #[test]
    fn route_boost_applies_when_query_hints_and_chunk_is_route() {
        let heuristics = RankingHeuristics::new(1.3, 0.7, 1.2);
        let decision = heuristics.evaluate("create new endpoint", &chunk_with(vec![], Some("POST")));
        assert!(decision.multiplier > 1.0);
    }

    #[test]
    fn noise_penalty_applies_for_migration_script_tag() {
        let heuristics = RankingHeuristics::new(1.3, 0.7, 1.2);
        let decision = heuristics.evaluate("find config", &chunk_with(vec!["migration_script".to_string()], None));
        assert!(decision.multiplier < 1.0);
    }

    #[test]
    fn no_matches_yields_neutral_multiplier() {
        let heuristics = RankingHeuristics::new(1.3, 0.7, 1.2);
        let decision = heuristics.evaluate("random words here", &chunk_with(vec![], None));
        assert_eq!(decision.multiplier, 1.0);
    }
}
