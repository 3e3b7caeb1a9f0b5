//! Reranking of merged retrieval candidates.
//!
//! A [`RelevanceScorer`] assigns each candidate a score that depends only on
//! the query and the chunk. Candidates are ordered by score (highest first),
//! then by their pre-rerank distance rank, then by chunk id.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::expand::Candidate;
use crate::types::Chunk;

/// Pure relevance function of `(query, chunk)`.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &str, chunk: &Chunk) -> f32;

    fn name(&self) -> &str;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "with", "you",
];

/// Lowercased alphanumeric terms of `text`, minus stopwords.
pub fn content_terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Fraction of the query's content terms that also occur in the chunk.
///
/// A query without content terms scores every chunk 0, which leaves the
/// distance order untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOverlapScorer;

impl RelevanceScorer for LexicalOverlapScorer {
    fn score(&self, query: &str, chunk: &Chunk) -> f32 {
        let query_terms = content_terms(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let chunk_terms = content_terms(&chunk.text);
        let shared = query_terms.intersection(&chunk_terms).count();
        shared as f32 / query_terms.len() as f32
    }

    fn name(&self) -> &str {
        "lexical-overlap"
    }
}

/// A candidate after reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub score: f32,
    /// Best vector distance from retrieval.
    pub distance: f32,
}

/// Orders candidates by a [`RelevanceScorer`].
pub struct Reranker {
    scorer: Box<dyn RelevanceScorer>,
}

impl std::fmt::Debug for Reranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reranker")
            .field("scorer", &self.scorer.name())
            .finish()
    }
}

impl Default for Reranker {
    fn default() -> Self {
        Self::new(Box::new(LexicalOverlapScorer))
    }
}

impl Reranker {
    pub fn new(scorer: Box<dyn RelevanceScorer>) -> Self {
        Self { scorer }
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Score and order `candidates`. Returns exactly the input chunks, each once.
    ///
    /// Equal scores fall back to the smaller retrieval distance; equal
    /// distances share a rank and fall back to the chunk id, so the output
    /// does not depend on the input order.
    pub fn rerank(&self, query: &str, candidates: Vec<Candidate>) -> Vec<RankedChunk> {
        let mut ranked: Vec<RankedChunk> = candidates
            .into_iter()
            .map(|candidate| RankedChunk {
                score: self.scorer.score(query, &candidate.chunk),
                chunk: candidate.chunk,
                distance: candidate.distance,
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.distance.total_cmp(&b.distance))
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        ranked
    }
}
