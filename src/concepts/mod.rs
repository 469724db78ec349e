//! Concept extraction
//!
//! Turns free text into short noun-phrase concepts: stopword-filtered
//! n-grams of 1–5 tokens, deduplicated by lowercased text and embedded in a
//! single batch. The extractor is the bridge between natural-language
//! queries and concept vertices in the graph.

use crate::embedding::{Embedder, EmbeddingError};
use crate::graph::{normalize_concept_text, Concept};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from concept extraction
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The embedding backend is rate limiting — retried by the caller.
    #[error("concept extractor busy, retry after {retry_after_s}s")]
    Busy { retry_after_s: u64 },

    #[error("embedding error: {0}")]
    Embedding(EmbeddingError),
}

impl From<EmbeddingError> for ExtractorError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::RateLimited { retry_after_s } => ExtractorError::Busy { retry_after_s },
            other => ExtractorError::Embedding(other),
        }
    }
}

/// Input cap — longer blobs are truncated at a char boundary.
const MAX_INPUT_BYTES: usize = 4096;

/// Longest phrase considered a concept.
const MAX_NGRAM_TOKENS: usize = 5;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "of", "in", "on", "at", "to",
    "for", "from", "by", "with", "without", "as", "is", "are", "was", "were", "be", "been",
    "being", "am", "do", "does", "did", "will", "would", "shall", "should", "may", "might",
    "must", "can", "could", "not", "no", "nor", "this", "that", "these", "those", "it", "its",
    "they", "them", "their", "we", "our", "you", "your", "he", "she", "his", "her", "i", "me",
    "my", "any", "all", "each", "such", "other", "than", "so", "too", "very", "both", "either",
    "into", "under", "over", "between", "upon", "per", "via", "which", "what", "who", "whom",
    "when", "where", "how", "why", "there", "here", "also", "more", "most", "some", "only",
    "own", "same", "about", "against", "during", "before", "after", "above", "below", "up",
    "down", "out", "off", "again", "further", "once", "has", "have", "had", "having",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Extracts deduplicated concepts from text and embeds them in one batch.
pub struct ConceptExtractor {
    embedder: Arc<dyn Embedder>,
    max_concepts: usize,
}

impl ConceptExtractor {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            max_concepts: 8,
        }
    }

    /// Cap on how many concepts a single extraction returns.
    pub fn with_max_concepts(mut self, max_concepts: usize) -> Self {
        self.max_concepts = max_concepts;
        self
    }

    /// Extract ranked concepts from a text blob. Empty input yields an
    /// empty list; the candidate order is deterministic.
    pub async fn extract(&self, text: &str) -> Result<Vec<Concept>, ExtractorError> {
        let text = truncate_at_char_boundary(text, MAX_INPUT_BYTES);
        let phrases = rank_candidate_phrases(text, self.max_concepts);
        if phrases.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed_batch(&phrases).await?;
        Ok(phrases
            .into_iter()
            .zip(embeddings)
            .map(|(phrase, embedding)| Concept::new(phrase, embedding))
            .collect())
    }
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Candidate phrases: n-grams of 1..=5 tokens over stopword-free token runs,
/// ranked by frequency, then phrase length, then lexicographically.
fn rank_candidate_phrases(text: &str, max_concepts: usize) -> Vec<String> {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| c.is_ascii_punctuation())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();

    // Runs of consecutive non-stopword tokens
    let mut runs: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for token in &tokens {
        if is_stopword(token) {
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token.as_str());
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    let mut counts: HashMap<String, (usize, usize)> = HashMap::new(); // text → (freq, token count)
    for run in &runs {
        for len in 1..=MAX_NGRAM_TOKENS.min(run.len()) {
            for window in run.windows(len) {
                let phrase = normalize_concept_text(&window.join(" "));
                let entry = counts.entry(phrase).or_insert((0, len));
                entry.0 += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(phrase, (freq, len))| (phrase, freq, len))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(max_concepts);
    ranked.into_iter().map(|(phrase, _, _)| phrase).collect()
}
