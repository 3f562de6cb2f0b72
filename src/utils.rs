use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("sentence regex is valid"));

/// One ordered fragment of a story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// Split text into sentences at `.`, `!` or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let text = text.trim();
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // the punctuation mark is a single ASCII byte
        let end = m.start() + 1;
        let s = text[start..end].trim();
        if !s.is_empty() {
            sentences.push(s);
        }
        start = m.end();
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Partition a story into at most `max_chunks` chunks of consecutive sentences.
///
/// Every chunk holds `ceil(sentences / max_chunks)` sentences except possibly the
/// last one. Sentences inside a chunk are joined with a single space.
pub fn chunk_story(story: &str, max_chunks: usize) -> Vec<Chunk> {
    let sentences = split_sentences(story);
    if sentences.is_empty() || max_chunks == 0 {
        warn!("Nothing to split: story has no sentences or frame budget is zero");
        return Vec::new();
    }

    let chunk_size = sentences.len().div_ceil(max_chunks);
    let chunks: Vec<Chunk> = sentences
        .chunks(chunk_size)
        .take(max_chunks)
        .enumerate()
        .map(|(index, group)| Chunk {
            index,
            text: group.join(" "),
        })
        .collect();
    debug!(
        "Split {} sentences into {} chunks of up to {} sentences",
        sentences.len(),
        chunks.len(),
        chunk_size
    );
    chunks
}

/// Collapse all runs of whitespace into single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
