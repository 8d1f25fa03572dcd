//! Groups symbols into retrieval-sized chunks: splits oversized symbols,
//! merges undersized ones, and attaches derived metadata (§4.4).

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::intent::extract_intent_metadata;
use crate::models::{canonicalize, CodeChunk, SymbolBlock};
use crate::tokenizer::{estimate_tokens, normalize_terms};

#[derive(Debug, Clone)]
struct ChunkDraft {
    start_line: u32,
    end_line: u32,
    symbol: Option<String>,
    symbol_kind: Option<String>,
    text: String,
}

impl ChunkDraft {
    fn tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// Line-count-bounded chunk assembly: symbols that are too big get split,
/// symbols too small get merged with neighbors.
pub struct ChunkBuilder {
    min_tokens: usize,
    max_tokens: usize,
    target_tokens: usize,
}

impl Default for ChunkBuilder {
    fn default() -> Self {
        Self {
            min_tokens: 200,
            max_tokens: 800,
            target_tokens: 500,
        }
    }
}

impl ChunkBuilder {
    pub fn new(min_tokens: usize, max_tokens: usize, target_tokens: usize) -> Self {
        Self {
            min_tokens,
            max_tokens,
            target_tokens,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build_chunks(
        &self,
        repo_path: &str,
        relative_path: &str,
        language: &str,
        file_hash: &str,
        content: &str,
        symbols: &[SymbolBlock],
    ) -> Vec<CodeChunk> {
        let drafts = self.initial_drafts(content, symbols);
        let drafts = self.split_large_drafts(drafts);
        let drafts = self.merge_small_drafts(drafts);

        let mut chunks = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let intent_meta = extract_intent_metadata(
                relative_path,
                draft.symbol_kind.as_deref(),
                draft.symbol.as_deref(),
                &draft.text,
            );
            let description = describe(relative_path, &draft, &intent_meta);

            let mut symbol_terms: BTreeSet<String> =
                normalize_terms(draft.symbol.as_deref().unwrap_or("")).into_iter().collect();
            let mut structural_terms: BTreeSet<String> =
                intent_meta.structural_terms.iter().cloned().collect();
            structural_terms.extend(normalize_terms(relative_path));
            symbol_terms.extend(structural_terms.iter().cloned());

            let mut keyword_source = vec![description.clone(), draft.text.chars().take(4000).collect()];
            if let Some(method) = &intent_meta.route_method {
                let mut route_context = vec![
                    format!("Intent: {} resource", intent_meta.route_intent.as_deref().unwrap_or("unknown")),
                    format!("HTTP method: {method}"),
                ];
                if let Some(resource) = &intent_meta.route_resource {
                    route_context.push(format!("Resource: {resource}"));
                }
                if let Some(path) = &intent_meta.route_path {
                    route_context.push(format!("Path: {path}"));
                }
                keyword_source.push(route_context.join("\n"));
            }
            let keyword_terms = canonicalize(normalize_terms(&keyword_source.join("\n")));

            let chunk_id = {
                let mut hasher = Sha256::new();
                hasher.update(
                    format!("{}|{}|{}|{}", relative_path, draft.start_line, draft.end_line, draft.text)
                        .as_bytes(),
                );
                format!("{:x}", hasher.finalize())
            };

            chunks.push(CodeChunk {
                chunk_id,
                repo_path: repo_path.to_string(),
                file_path: relative_path.to_string(),
                language: language.to_string(),
                start_line: draft.start_line,
                end_line: draft.end_line,
                symbol: draft.symbol.clone(),
                symbol_kind: draft.symbol_kind.clone(),
                description,
                tokens: draft.tokens() as u32,
                keywords: keyword_terms,
                symbol_terms: canonicalize(symbol_terms.into_iter().collect()),
                structural_terms: canonicalize(structural_terms.into_iter().collect()),
                intent_tags: intent_meta.intent_tags,
                route_method: intent_meta.route_method,
                route_path: intent_meta.route_path,
                route_intent: intent_meta.route_intent,
                route_resource: intent_meta.route_resource,
                llm_summary: None,
                content_hash: file_hash.to_string(),
                text: draft.text,
            });
        }

        chunks
    }

    fn initial_drafts(&self, content: &str, symbols: &[SymbolBlock]) -> Vec<ChunkDraft> {
        let lines: Vec<&str> = content.lines().collect();
        if symbols.is_empty() {
            return self.slice_file_fallback(&lines);
        }

        let mut ordered: Vec<&SymbolBlock> = symbols.iter().collect();
        ordered.sort_by_key(|s| (s.start_line, s.end_line));

        let mut drafts = Vec::new();
        for symbol in ordered {
            let start = symbol.start_line.max(1);
            let end = symbol.end_line.max(start);
            let text = lines
                .get((start - 1) as usize..end as usize)
                .map(|s| s.join("\n"))
                .unwrap_or_default();
            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }
            drafts.push(ChunkDraft {
                start_line: start,
                end_line: end,
                symbol: symbol.name.clone(),
                symbol_kind: Some(symbol.kind.as_str().to_string()),
                text,
            });
        }

        if drafts.is_empty() {
            self.slice_file_fallback(&lines)
        } else {
            drafts
        }
    }

    fn slice_file_fallback(&self, lines: &[&str]) -> Vec<ChunkDraft> {
        if lines.is_empty() {
            return Vec::new();
        }
        let content = lines.join("\n");
        if estimate_tokens(&content) <= self.max_tokens {
            return vec![ChunkDraft {
                start_line: 1,
                end_line: lines.len() as u32,
                symbol: None,
                symbol_kind: Some("major_block".to_string()),
                text: content,
            }];
        }

        self.split_text_by_lines(&content, 1)
            .into_iter()
            .map(|(text, start, end)| ChunkDraft {
                start_line: start,
                end_line: end,
                symbol: None,
                symbol_kind: Some("major_block".to_string()),
                text,
            })
            .collect()
    }

    fn split_large_drafts(&self, drafts: Vec<ChunkDraft>) -> Vec<ChunkDraft> {
        let mut out = Vec::with_capacity(drafts.len());
        for draft in drafts {
            if draft.tokens() <= self.max_tokens {
                out.push(draft);
                continue;
            }
            for (text, start, end) in self.split_text_by_lines(&draft.text, draft.start_line) {
                out.push(ChunkDraft {
                    start_line: start,
                    end_line: end,
                    symbol: draft.symbol.clone(),
                    symbol_kind: draft.symbol_kind.clone(),
                    text,
                });
            }
        }
        out
    }

    /// Accumulates lines until `target_tokens` is exceeded (once at least
    /// `min_tokens` is banked), or force-cuts at `max_tokens` regardless.
    fn split_text_by_lines(&self, text: &str, start_line: u32) -> Vec<(String, u32, u32)> {
        let lines: Vec<&str> = text.lines().collect();
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;
        let mut block_start = start_line;

        for (idx, line) in lines.iter().enumerate() {
            let line_tokens = estimate_tokens(line);
            let projected = current_tokens + line_tokens;
            if !current.is_empty() && projected > self.target_tokens && current_tokens >= self.min_tokens {
                let end_line = block_start + current.len() as u32 - 1;
                chunks.push((current.join("\n"), block_start, end_line));
                block_start = start_line + idx as u32;
                current.clear();
                current_tokens = 0;
            }

            current.push(line);
            current_tokens += line_tokens;

            if current_tokens >= self.max_tokens {
                let end_line = block_start + current.len() as u32 - 1;
                chunks.push((current.join("\n"), block_start, end_line));
                block_start = end_line + 1;
                current.clear();
                current_tokens = 0;
            }
        }

        if !current.is_empty() {
            let end_line = block_start + current.len() as u32 - 1;
            chunks.push((current.join("\n"), block_start, end_line));
        }

        chunks
    }

    fn merge_small_drafts(&self, drafts: Vec<ChunkDraft>) -> Vec<ChunkDraft> {
        if drafts.is_empty() {
            return Vec::new();
        }

        let mut sorted = drafts;
        sorted.sort_by_key(|d| (d.start_line, d.end_line));

        let mut merged: Vec<ChunkDraft> = Vec::new();
        let mut buffer: Vec<ChunkDraft> = Vec::new();

        let flush = |buffer: &mut Vec<ChunkDraft>, merged: &mut Vec<ChunkDraft>| {
            if buffer.is_empty() {
                return;
            }
            if buffer.len() == 1 {
                merged.push(buffer.remove(0));
            } else {
                let text = buffer.iter().map(|d| d.text.as_str()).collect::<Vec<_>>().join("\n\n");
                merged.push(ChunkDraft {
                    start_line: buffer[0].start_line,
                    end_line: buffer[buffer.len() - 1].end_line,
                    symbol: None,
                    symbol_kind: Some("major_block".to_string()),
                    text,
                });
                buffer.clear();
            }
        };

        for draft in sorted.drain(..) {
            if draft.tokens() >= self.min_tokens {
                flush(&mut buffer, &mut merged);
                merged.push(draft);
                continue;
            }

            if buffer.is_empty() {
                buffer.push(draft);
                continue;
            }

            let current_text = buffer.iter().map(|d| d.text.as_str()).collect::<Vec<_>>().join("\n\n");
            let current_tokens = estimate_tokens(&current_text);
            let gap = draft.start_line.saturating_sub(buffer[buffer.len() - 1].end_line);
            if current_tokens + draft.tokens() <= self.max_tokens && gap <= 40 {
                buffer.push(draft);
            } else {
                flush(&mut buffer, &mut merged);
                buffer.push(draft);
            }
        }
        flush(&mut buffer, &mut merged);

        if merged.len() >= 2 && merged[merged.len() - 1].tokens() < self.min_tokens {
            let tail = merged.pop().unwrap();
            let prev = merged.pop().unwrap();
            let combined_text = format!("{}\n\n{}", prev.text, tail.text);
            if estimate_tokens(&combined_text) <= self.max_tokens {
                merged.push(ChunkDraft {
                    start_line: prev.start_line,
                    end_line: tail.end_line,
                    symbol: prev.symbol.clone(),
                    symbol_kind: prev.symbol_kind.clone(),
                    text: combined_text,
                });
            } else {
                merged.push(prev);
                merged.push(tail);
            }
        }

        merged
    }
}

fn describe(
    file_path: &str,
    draft: &ChunkDraft,
    intent_meta: &crate::intent::IntentMetadata,
) -> String {
    let trimmed = draft.text.trim();
    let first_line = trimmed.lines().next().unwrap_or("").trim();
    let preview: String = first_line.chars().take(120).collect();

    let mut route_suffix = String::new();
    if let Some(method) = &intent_meta.route_method {
        route_suffix.push_str(&format!(
            " Intent: {} resource. HTTP method: {}.",
            intent_meta.route_intent.as_deref().unwrap_or("unknown"),
            method
        ));
        if let Some(resource) = &intent_meta.route_resource {
            route_suffix.push_str(&format!(" Resource: {resource}."));
        }
        if let Some(path) = &intent_meta.route_path {
            route_suffix.push_str(&format!(" Path: {path}."));
        }
    }
    if !intent_meta.intent_tags.is_empty() {
        route_suffix.push_str(&format!(" Tags: {}.", intent_meta.intent_tags.join(", ")));
    }

    let body = match draft.symbol_kind.as_deref() {
        Some("class") if draft.symbol.is_some() => format!(
            "Class {} in {}. Starts with: {}{}",
            draft.symbol.as_deref().unwrap(),
            file_path,
            preview,
            route_suffix
        ),
        Some("route") => format!(
            "Route handler {} in {}. Starts with: {}{}",
            draft.symbol.as_deref().unwrap_or("unnamed route"),
            file_path,
            preview,
            route_suffix
        ),
        Some("handler") => format!(
            "Handler {} in {}. Starts with: {}{}",
            draft.symbol.as_deref().unwrap_or("anonymous handler"),
            file_path,
            preview,
            route_suffix
        ),
        Some("function") if draft.symbol.is_some() => format!(
            "Function {} in {}. Starts with: {}{}",
            draft.symbol.as_deref().unwrap(),
            file_path,
            preview,
            route_suffix
        ),
        _ => format!(
            "Major code block in {} (lines {}-{}). Starts with: {}{}",
            file_path, draft.start_line, draft.end_line, preview, route_suffix
        ),
    };
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SymbolKind;

    fn symbol(kind: SymbolKind, name: &str, start: u32, end: u32) -> SymbolBlock {
        SymbolBlock {
            kind,
            name: Some(name.to_string()),
            start_line: start,
            end_line: end,
            text: String::new(),
        }
    }

    #[test]
    fn builds_one_chunk_per_symbol_when_sizes_fit() {
        let content = "def add(a, b):\n    return a + b\n\n\ndef sub(a, b):\n    return a - b\n";
        let symbols = vec![
            symbol(SymbolKind::Function, "add", 1, 2),
            symbol(SymbolKind::Function, "sub", 5, 6),
        ];
        let builder = ChunkBuilder::default();
        let chunks = builder.build_chunks("/repo", "math.py", "python", "deadbeef", content, &symbols);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].symbol.as_deref(), Some("add"));
        assert!(chunks[0].chunk_id.len() == 64);
    }

    #[test]
    fn falls_back_to_whole_file_when_no_symbols() {
        let content = "x = 1\ny = 2\n";
        let builder = ChunkBuilder::default();
        let chunks = builder.build_chunks("/repo", "const.py", "python", "deadbeef", content, &[]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol_kind.as_deref(), Some("major_block"));
    }

    #[test]
    fn merges_adjacent_tiny_symbols() {
        let content: String = (1..=10).map(|i| format!("def f{i}():\n    pass\n\n")).collect();
        let symbols: Vec<SymbolBlock> = (0..10)
            .map(|i| symbol(SymbolKind::Function, &format!("f{i}"), i * 3 + 1, i * 3 + 2))
            .collect();
        let builder = ChunkBuilder::new(50, 800, 200);
        let chunks = builder.build_chunks("/repo", "tiny.py", "python", "deadbeef", &content, &symbols);
        assert!(chunks.len() < symbols.len());
    }

    #[test]
    fn chunk_id_is_deterministic_for_same_input() {
        let content = "def f():\n    pass\n";
        let symbols = vec![symbol(SymbolKind::Function, "f", 1, 2)];
        let builder = ChunkBuilder::default();
        let a = builder.build_chunks("/repo", "f.py", "python", "h1", content, &symbols);
        let b = builder.build_chunks("/repo", "f.py", "python", "h1", content, &symbols);
        assert_eq!(a[0].chunk_id, b[0].chunk_id);
    }
}
