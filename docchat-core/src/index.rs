//! Exact nearest-neighbour index over chunk embeddings.
//!
//! Search is a brute-force linear scan over every entry. Corpora are a few
//! thousand chunks at most, where a flat scan is both exact and fast enough;
//! approximate or sharded search is out of scope.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::types::Chunk;

/// Distance function, fixed when the index is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean distance.
    L2,
    /// `1 - cos(a, b)`. Vectors are L2-normalised on insertion.
    Cosine,
}

impl DistanceMetric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Self::Cosine => 1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::L2 => 0,
            Self::Cosine => 1,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::L2),
            1 => Some(Self::Cosine),
            _ => None,
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L2 => write!(f, "l2"),
            Self::Cosine => write!(f, "cosine"),
        }
    }
}

/// Scale `v` to unit length. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// A chunk and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    chunk: Chunk,
    embedding: Vec<f32>,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Internal id (insertion position) of the entry.
    pub id: usize,
    pub chunk: Chunk,
    pub distance: f32,
}

/// In-memory vector index. Internal ids are insertion positions and never change.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    metric: DistanceMetric,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Build an index from scratch. Fails on empty input or mixed dimensions.
    pub fn build(entries: Vec<IndexEntry>, metric: DistanceMetric) -> Result<Self> {
        let Some(first) = entries.first() else {
            return Err(RagError::empty_input("VectorIndex::build"));
        };
        let mut index = Self::empty(metric, first.embedding.len());
        index.add(entries)?;
        Ok(index)
    }

    /// An index with no entries yet.
    pub fn empty(metric: DistanceMetric, dimensions: usize) -> Self {
        Self {
            metric,
            dimensions,
            entries: Vec::new(),
        }
    }

    /// Reassemble a saved index. Embeddings are taken as stored (already
    /// normalised for cosine) so distances match the saved index bit for bit.
    pub(crate) fn from_persisted(
        metric: DistanceMetric,
        dimensions: usize,
        entries: Vec<IndexEntry>,
    ) -> Self {
        Self {
            metric,
            dimensions,
            entries,
        }
    }

    /// Append entries; existing ids are untouched. Nothing is added if any
    /// entry has the wrong dimension.
    pub fn add(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.len() != self.dimensions)
        {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.embedding.len(),
            });
        }
        self.entries.reserve(entries.len());
        for mut entry in entries {
            if self.metric == DistanceMetric::Cosine {
                normalize(&mut entry.embedding);
            }
            self.entries.push(entry);
        }
        Ok(())
    }

    /// The `k` nearest entries, ascending by distance, ties by lower id.
    ///
    /// `k` is clamped to the index size; an empty index yields no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let mut query = query.to_vec();
        if self.metric == DistanceMetric::Cosine {
            normalize(&mut query);
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(id, entry)| (id, self.metric.distance(&query, &entry.embedding)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k.min(self.entries.len()));

        Ok(scored
            .into_iter()
            .map(|(id, distance)| SearchHit {
                id,
                chunk: self.entries[id].chunk.clone(),
                distance,
            })
            .collect())
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in id order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}
