//! Query expansion: paraphrase the question, search with every phrasing and
//! merge the hits.
//!
//! Search passes are numbered (0 = the original query, then each variant in
//! the order the model listed them). Merging depends only on those numbers,
//! never on which embedding request finished first.

use futures::future::try_join_all;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{SearchHit, VectorIndex};
use crate::llm::LanguageModel;
use crate::types::Chunk;

/// A deduplicated retrieval candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk: Chunk,
    /// Smallest distance seen for this chunk across all passes.
    pub distance: f32,
    /// First search pass that returned this chunk.
    pub first_pass: usize,
    /// Rank within that first pass.
    pub first_rank: usize,
}

/// Result of [`QueryExpander::expand`].
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    /// Queries actually searched, original first.
    pub queries: Vec<String>,
    pub candidates: Vec<Candidate>,
    /// Set when the model output could not be used and only the original query ran.
    pub fell_back: bool,
}

/// Generates paraphrases with one model call and merges their searches.
#[derive(Debug, Clone)]
pub struct QueryExpander {
    n_variants: usize,
    fetch_k: usize,
}

impl QueryExpander {
    pub fn new(n_variants: usize, fetch_k: usize) -> Self {
        Self {
            n_variants,
            fetch_k,
        }
    }

    pub fn n_variants(&self) -> usize {
        self.n_variants
    }

    /// The prompt asking for `n_variants` phrasings of `query`.
    pub fn variant_prompt(&self, query: &str) -> String {
        format!(
            "Generate {n} different ways to ask the following question. They should \
             keep the original meaning but use different wording, to help find relevant \
             passages in a document collection.\n\
             Return exactly {n} lines, one question per line, with no numbering and no \
             other text.\n\n\
             Question: {query}",
            n = self.n_variants
        )
    }

    /// Ask the model for variants of `query`, search with all of them and
    /// return the merged, deduplicated candidates.
    ///
    /// Unparseable model output degrades to searching with `query` alone.
    /// Provider failures are returned as errors.
    pub async fn expand(
        &self,
        query: &str,
        index: &VectorIndex,
        embedder: &dyn EmbeddingProvider,
        llm: &dyn LanguageModel,
    ) -> Result<Expansion> {
        let mut queries = vec![query.to_string()];
        let mut fell_back = false;

        if self.n_variants > 0 {
            let output = llm.complete(&self.variant_prompt(query)).await?;
            match parse_variants(&output, self.n_variants) {
                Ok(variants) => queries.extend(variants),
                Err(e) => {
                    warn!(error = %e, "Query expansion output unusable, searching with the original query only");
                    fell_back = true;
                }
            }
        }

        // Embeddings may be fetched concurrently; results stay indexed by pass.
        let vectors = try_join_all(queries.iter().map(|q| embedder.embed(q))).await?;
        let passes = vectors
            .iter()
            .map(|v| index.search(v, self.fetch_k))
            .collect::<Result<Vec<_>>>()?;

        let candidates = merge_passes(passes);
        debug!(
            queries = queries.len(),
            candidates = candidates.len(),
            fell_back,
            "Expanded query"
        );
        Ok(Expansion {
            queries,
            candidates,
            fell_back,
        })
    }
}

/// Parse a delimited list of exactly `expected` non-empty phrasings.
///
/// Accepts one phrasing per line; list markers such as `1.`, `2)`, `-` and
/// `*` and surrounding quotes are stripped.
pub fn parse_variants(output: &str, expected: usize) -> Result<Vec<String>> {
    let variants: Vec<String> = output
        .lines()
        .map(clean_line)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if variants.len() != expected {
        return Err(RagError::ExpansionParse {
            expected,
            found: variants.len(),
        });
    }
    Ok(variants)
}

fn clean_line(line: &str) -> &str {
    let mut line = line.trim();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            line = stripped.trim_start();
        }
    } else if let Some(stripped) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        line = stripped.trim_start();
    }
    line.trim_matches('"').trim()
}

/// Union search passes by chunk id, keeping the smallest distance per chunk.
///
/// Output is ascending by distance; ties go to the chunk whose first
/// appearance came in the earlier pass, then the higher rank in that pass.
pub fn merge_passes(passes: Vec<Vec<SearchHit>>) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (pass, hits) in passes.into_iter().enumerate() {
        for (rank, hit) in hits.into_iter().enumerate() {
            match positions.get(&hit.chunk.id) {
                Some(&pos) => {
                    let existing = &mut merged[pos];
                    if hit.distance < existing.distance {
                        existing.distance = hit.distance;
                    }
                }
                None => {
                    positions.insert(hit.chunk.id.clone(), merged.len());
                    merged.push(Candidate {
                        chunk: hit.chunk,
                        distance: hit.distance,
                        first_pass: pass,
                        first_rank: rank,
                    });
                }
            }
        }
    }

    merged.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.first_pass.cmp(&b.first_pass))
            .then(a.first_rank.cmp(&b.first_rank))
    });
    merged
}
