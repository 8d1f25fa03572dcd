//! Five-component hybrid relevance score (§4.8), grounded on
//! `xtrc.core.scorer.HybridScorer`.

use std::collections::HashSet;

use crate::route::{http_intent, infer_query_signal};
use crate::tokenizer::normalize_terms;

const VECTOR_WEIGHT: f64 = 0.50;
const KEYWORD_WEIGHT: f64 = 0.18;
const SYMBOL_WEIGHT: f64 = 0.12;
const INTENT_WEIGHT: f64 = 0.12;
const STRUCTURAL_WEIGHT: f64 = 0.08;

/// The five weighted components that make up a match's total score, plus
/// the combined total itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreComponents {
    pub total: f64,
    pub vector: f64,
    pub keyword: f64,
    pub symbol: f64,
    pub intent: f64,
    pub structural: f64,
}

#[derive(Default)]
pub struct HybridScorer;

impl HybridScorer {
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn score(
        &self,
        query: &str,
        vector_score: f64,
        keywords: &[String],
        symbol_terms: &[String],
        route_intent: Option<&str>,
        route_method: Option<&str>,
        route_resource: Option<&str>,
        structural_terms: &[String],
    ) -> ScoreComponents {
        let query_signal = infer_query_signal(query);
        let query_terms = normalize_terms(query);

        let keyword = overlap_score(&query_terms, keywords);
        let symbol = overlap_score(&query_terms, symbol_terms);
        let vector = normalize_vector_score(vector_score);
        let intent = intent_score(&query_signal.intents, route_intent, route_method);

        let mut candidate_structural: Vec<String> = structural_terms.to_vec();
        if let Some(method) = route_method {
            candidate_structural.push(method.to_lowercase());
        }
        if let Some(intent_name) = route_intent {
            candidate_structural.push(intent_name.to_lowercase());
        }
        if let Some(resource) = route_resource {
            candidate_structural.extend(normalize_terms(resource));
        }
        let structural = overlap_score(&query_signal.structural_terms, &candidate_structural);

        let total = VECTOR_WEIGHT * vector
            + KEYWORD_WEIGHT * keyword
            + SYMBOL_WEIGHT * symbol
            + INTENT_WEIGHT * intent
            + STRUCTURAL_WEIGHT * structural;

        ScoreComponents {
            total,
            vector,
            keyword,
            symbol,
            intent,
            structural,
        }
    }
}

/// Cosine similarity may land in `[-1, 1]`; rescale into `[0, 1]` unless
/// it's already there (e.g. a dot product of L2-normalized vectors clamped
/// upstream).
fn normalize_vector_score(score: f64) -> f64 {
    if (0.0..=1.0).contains(&score) {
        score
    } else {
        ((score + 1.0) / 2.0).clamp(0.0, 1.0)
    }
}

fn overlap_score(query_terms: &[String], candidates: &[String]) -> f64 {
    if query_terms.is_empty() || candidates.is_empty() {
        return 0.0;
    }
    let qset: HashSet<&String> = query_terms.iter().collect();
    let cset: HashSet<&String> = candidates.iter().collect();
    let overlap = qset.intersection(&cset).count();
    overlap as f64 / qset.len() as f64
}

fn intent_score(query_intents: &[String], route_intent: Option<&str>, route_method: Option<&str>) -> f64 {
    if query_intents.is_empty() {
        return 0.0;
    }
    let mut candidate: HashSet<String> = HashSet::new();
    if let Some(intent) = route_intent {
        candidate.insert(intent.to_lowercase());
    }
    if let Some(method) = route_method {
        let normalized = method.to_lowercase();
        if let Some(mapped) = http_intent(&normalized) {
            candidate.insert(mapped.to_string());
        }
        candidate.insert(normalized);
    }
    if candidate.is_empty() {
        return 0.0;
    }
    let query_set: HashSet<&String> = query_intents.iter().collect();
    let overlap = query_set.iter().filter(|t| candidate.contains(t.as_str())).count();
    overlap as f64 / query_set.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_score_outside_unit_range_is_rescaled() {
        assert!((normalize_vector_score(-1.0) - 0.0).abs() < 1e-9);
        assert!((normalize_vector_score(1.0) - 1.0).abs() < 1e-9);
        assert!((normalize_vector_score(0.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn keyword_overlap_scores_fraction_of_query_terms_matched() {
        let scorer = HybridScorer::new();
        let components = scorer.score(
            "create user account",
            0.8,
            &["create".to_string(), "user".to_string()],
            &[],
            None,
            None,
            None,
            &[],
        );
        assert!(components.keyword > 0.0);
    }

    #[test]
    fn route_post_matches_create_intent_query() {
        let scorer = HybridScorer::new();
        let components = scorer.score(
            "create a new order",
            0.5,
            &[],
            &[],
            Some("create"),
            Some("POST"),
            None,
            &[],
        );
        assert!(components.intent > 0.0);
    }

    #[test]
    fn no_query_terms_yields_zero_overlap_components() {
        let scorer = HybridScorer::new();
        let components = scorer.score("!!!", 0.5, &["create".to_string()], &[], None, None, None, &[]);
        assert_eq!(components.keyword, 0.0);
    }
}
