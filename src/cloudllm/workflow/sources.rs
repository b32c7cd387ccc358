//! Source normalization and deduplication (§6.4, §9 "Source normalization").
//!
//! A pure function over a union type `string | {url?, title?, document_id?,
//! ...}`. Truncates snippets deterministically and never carries raw
//! provider payloads through.

use super::config::EngineConfig;
use super::types::NormalizedSource;
use std::collections::HashSet;

/// Anything that can be coerced into a [`NormalizedSource`]: a bare string
/// (treated as a title) or an already-structured source.
#[derive(Debug, Clone)]
pub enum RawSource {
    Text(String),
    Structured(NormalizedSource),
}

impl From<&str> for RawSource {
    fn from(s: &str) -> Self {
        RawSource::Text(s.to_string())
    }
}

impl From<NormalizedSource> for RawSource {
    fn from(s: NormalizedSource) -> Self {
        RawSource::Structured(s)
    }
}

/// Normalize one raw source, truncating its snippet to `max_chars`.
pub fn normalize(raw: RawSource, max_chars: usize) -> NormalizedSource {
    match raw {
        RawSource::Text(text) => NormalizedSource {
            title: Some(text),
            ..Default::default()
        },
        RawSource::Structured(mut s) => {
            if let Some(snippet) = &mut s.snippet {
                truncate_in_place(snippet, max_chars);
            }
            s
        }
    }
}

fn truncate_in_place(s: &mut String, max_chars: usize) {
    if s.chars().count() > max_chars {
        *s = s.chars().take(max_chars).collect();
    }
}

/// Normalize and deduplicate a batch of sources, keeping the first occurrence
/// of each dedup key (first non-null of `url | document_id | title`).
/// Sources with none of the three are never deduplicated against each other.
///
/// Idempotent: calling this again on its own output is a no-op (Testable
/// Property 7 / property test in `sources_tests.rs`).
pub fn normalize_and_dedupe(raws: Vec<RawSource>, config: &EngineConfig) -> Vec<NormalizedSource> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for raw in raws {
        let normalized = normalize(raw, config.source_snippet_max_chars);
        match normalized.dedup_key() {
            Some(key) => {
                if seen.insert(key.to_string()) {
                    out.push(normalized);
                }
            }
            None => out.push(normalized),
        }
    }
    out
}

/// Merge a primary set (e.g. an LLM's `combined_sources`) with the union of
/// every candidate response's sources, per §4.3's conflict-resolution merge
/// rule, then dedupe the whole batch.
pub fn merge_and_dedupe(
    primary: Vec<NormalizedSource>,
    extra: impl IntoIterator<Item = NormalizedSource>,
    config: &EngineConfig,
) -> Vec<NormalizedSource> {
    let raws: Vec<RawSource> = primary
        .into_iter()
        .chain(extra)
        .map(RawSource::Structured)
        .collect();
    normalize_and_dedupe(raws, config)
}
