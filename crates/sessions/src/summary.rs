//! Derives the short reasoning summary streamed after a reasoning segment.

use std::sync::OnceLock;

use regex::Regex;

fn sentence_boundary() -> &'static Regex {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    BOUNDARY.get_or_init(|| Regex::new(r"[.!?]\s+").expect("static sentence pattern compiles"))
}

/// Extracts a concise summary from accumulated reasoning text: the first
/// two sentences (or the whole text when no sentence boundary exists),
/// capped at `max_chars`, streamed in `chunk_chars` pieces.
#[derive(Debug, Clone)]
pub struct SummaryExtractor {
    pub max_chars: usize,
    pub chunk_chars: usize,
}

impl Default for SummaryExtractor {
    fn default() -> Self {
        SummaryExtractor {
            max_chars: 480,
            chunk_chars: 160,
        }
    }
}

impl SummaryExtractor {
    /// The summary for `reasoning`, or `None` when the text is blank.
    pub fn extract(&self, reasoning: &str) -> Option<String> {
        let text = reasoning.trim();
        if text.is_empty() {
            return None;
        }

        let sentences = split_sentences(text);
        let summary = if sentences.is_empty() {
            text.to_string()
        } else {
            sentences
                .into_iter()
                .take(2)
                .collect::<Vec<_>>()
                .join(" ")
        };

        let capped: String = summary.chars().take(self.max_chars).collect();
        Some(capped.trim_end().to_string())
    }

    /// Split a summary into wire-sized delta chunks.
    pub fn chunked(&self, summary: &str) -> Vec<String> {
        let chars: Vec<char> = summary.chars().collect();
        chars
            .chunks(self.chunk_chars.max(1))
            .map(|chunk| chunk.iter().collect())
            .collect()
    }
}

/// Sentences of `text`, split on `.`/`!`/`?` followed by whitespace. The
/// trailing fragment (no closing punctuation) counts as a sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for boundary in sentence_boundary().find_iter(text) {
        // the punctuation char is ASCII, so +1 stays on a char boundary
        sentences.push(text[start..boundary.start() + 1].trim());
        start = boundary.end();
    }
    if start < text.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}
