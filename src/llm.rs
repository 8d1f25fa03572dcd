//! Generic LLM transport for query rewriting, chunk summarization, and
//! final-selection reranking (§4.17 capability traits).
//!
//! Grounded on `xtrc.llm.gemini_client.GeminiClient` /
//! `xtrc.llm.text_client.LLMTextClient`, genericized to any
//! OpenAI-compatible chat-completions endpoint rather than hardcoding a
//! single vendor — the core never branches on provider identity, only on
//! this trait.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::LlmError;

static JSON_CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"));
static JSON_OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// A backend capable of single-shot text and JSON completions, with
/// per-call latency reported back for telemetry (§7 `llm_latency_ms`).
pub trait Llm: Send + Sync {
    fn complete_text(&self, prompt: &str, model_name: &str) -> Result<(String, u64), LlmError>;
    fn complete_json(&self, prompt: &str, model_name: &str) -> Result<(serde_json::Value, u64), LlmError>;
}

/// Extracts a JSON object from a raw completion, trying the whole
/// response, any fenced ```json block, then the first brace-delimited
/// span — matching the original's layered-candidate parsing.
pub fn parse_json_object(raw_text: &str) -> Result<serde_json::Value, LlmError> {
    let mut candidates = vec![raw_text.to_string()];
    for cap in JSON_CODE_BLOCK_RE.captures_iter(raw_text) {
        candidates.push(cap[1].to_string());
    }
    if let Some(m) = JSON_OBJECT_RE.find(raw_text) {
        candidates.push(m.as_str().to_string());
    }

    for candidate in candidates {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str(trimmed) {
            return Ok(value);
        }
    }
    Err(LlmError::MalformedOutput("no JSON object found in LLM response".to_string()))
}

/// Cleans free-text completions: strips a fenced code block wrapper,
/// unwraps `{"query": "..."}` envelopes some models like to emit, and
/// strips surrounding quotes from the first line.
pub fn clean_text_response(raw_text: &str) -> String {
    let mut text = raw_text.trim().to_string();
    if text.starts_with("```") {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() >= 3 && lines[0].starts_with("```") && lines[lines.len() - 1].starts_with("```") {
            text = lines[1..lines.len() - 1].join("\n").trim().to_string();
        }
    }

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(&text) {
        if let Some(serde_json::Value::String(query)) = map.get("query") {
            return query.trim().to_string();
        }
    }

    let first_line = text.lines().next().unwrap_or("").trim();
    let unquoted = if (first_line.starts_with('"') && first_line.ends_with('"') && first_line.len() >= 2)
        || (first_line.starts_with('\'') && first_line.ends_with('\'') && first_line.len() >= 2)
    {
        &first_line[1..first_line.len() - 1]
    } else {
        first_line
    };
    unquoted.trim().to_string()
}

#[derive(Clone, Eq, PartialEq, Hash)]
struct CacheKey {
    model: String,
    prompt: String,
}

/// `Llm` backed by an OpenAI-compatible `/chat/completions` endpoint,
/// with a process-local LRU response cache (mirrors the Python client's
/// `functools.lru_cache` layer) and a bounded wait via `reqwest`'s
/// blocking client timeout.
pub struct HttpLlmClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    cache: Mutex<LruCache<CacheKey, String>>,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, default_model: impl Into<String>, timeout: Duration, cache_size: usize) -> Result<Self, LlmError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Failure(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(cache_size.max(1)).expect("nonzero"))),
        })
    }

    fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        let key = CacheKey {
            model: model.to_string(),
            prompt: prompt.to_string(),
        };
        if let Some(cached) = self.cache.lock().expect("llm cache lock").get(&key) {
            return Ok(cached.clone());
        }

        let body = serde_json::json!({
            "model": model,
            "temperature": 0.1,
            "max_tokens": 512,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(LlmError::Timeout(0.0)),
            Err(e) => return Err(LlmError::Failure(e.to_string())),
        };

        if !response.status().is_success() {
            return Err(LlmError::Failure(format!("LLM endpoint returned {}", response.status())));
        }

        let payload: serde_json::Value = response.json().map_err(|e| LlmError::Failure(e.to_string()))?;
        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedOutput("missing choices[0].message.content".to_string()))?
            .to_string();

        if text.trim().is_empty() {
            return Err(LlmError::Failure("LLM returned an empty response".to_string()));
        }

        self.cache.lock().expect("llm cache lock").put(key, text.clone());
        Ok(text)
    }
}

impl Llm for HttpLlmClient {
    fn complete_text(&self, prompt: &str, model_name: &str) -> Result<(String, u64), LlmError> {
        let model = if model_name.is_empty() { &self.default_model } else { model_name };
        let started = std::time::Instant::now();
        let raw = self.generate(model, prompt)?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let cleaned = clean_text_response(&raw);
        if cleaned.is_empty() {
            return Err(LlmError::MalformedOutput("LLM response was empty after cleaning".to_string()));
        }
        Ok((cleaned, latency_ms))
    }

    fn complete_json(&self, prompt: &str, model_name: &str) -> Result<(serde_json::Value, u64), LlmError> {
        let model = if model_name.is_empty() { &self.default_model } else { model_name };
        let started = std::time::Instant::now();
        let raw = self.generate(model, prompt)?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let value = parse_json_object(&raw)?;
        Ok((value, latency_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_from_fenced_code_block() {
        let raw = "Here you go:\n```json\n{\"file\": \"a.py\", \"line\": 3}\n```\n";
        let value = parse_json_object(raw).unwrap();
        assert_eq!(value["file"], "a.py");
    }

    #[test]
    fn parses_bare_json_object() {
        let raw = "{\"file\": \"a.py\", \"line\": 3}";
        let value = parse_json_object(raw).unwrap();
        assert_eq!(value["line"], 3);
    }

    #[test]
    fn errors_when_no_json_object_present() {
        assert!(parse_json_object("just some plain text").is_err());
    }

    #[test]
    fn clean_text_response_strips_quotes_and_code_fence() {
        assert_eq!(clean_text_response("```\n\"find the parser\"\n```"), "find the parser");
    }

    #[test]
    fn clean_text_response_unwraps_query_envelope() {
        assert_eq!(clean_text_response("{\"query\": \"find the parser\"}"), "find the parser");
    }
}
