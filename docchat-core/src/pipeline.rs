//! End-to-end retrieval pipeline: ingest documents, answer questions.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::chunk::Chunker;
use crate::config::RagConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::expand::QueryExpander;
use crate::generator::AnswerGenerator;
use crate::index::VectorIndex;
use crate::llm::LanguageModel;
use crate::memory::ChatMemory;
use crate::reranker::{RankedChunk, Reranker};
use crate::store::{IndexStore, PrepareOutcome, build_index};
use crate::types::{Chunk, Document};

/// Caller-owned reference to the live index.
///
/// Clones share the same index. [`RagPipeline::rebuild`] swaps the whole
/// index at once, so a query sees either the old index or the new one.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    inner: Arc<RwLock<Arc<VectorIndex>>>,
}

impl IndexHandle {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    /// Snapshot of the index at this moment.
    pub async fn current(&self) -> Arc<VectorIndex> {
        self.inner.read().await.clone()
    }

    async fn replace(&self, index: VectorIndex) {
        *self.inner.write().await = Arc::new(index);
    }
}

/// What an ingestion run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    /// Documents that were empty after extraction.
    pub skipped_documents: usize,
    pub outcome: PrepareOutcome,
}

/// Answer plus the chunks it was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<SourceReference>,
    pub retrieval_stats: RetrievalStats,
}

/// A chunk handed to the model, in prompt order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    pub document_id: String,
    pub chunk_id: String,
    pub source_name: String,
    pub relevance_score: f32,
    pub distance: f32,
    pub text_excerpt: String,
}

const EXCERPT_CHARS: usize = 200;

impl From<&RankedChunk> for SourceReference {
    fn from(ranked: &RankedChunk) -> Self {
        Self {
            document_id: ranked.chunk.source_document_id.clone(),
            chunk_id: ranked.chunk.id.clone(),
            source_name: ranked.chunk.source_name.clone(),
            relevance_score: ranked.score,
            distance: ranked.distance,
            text_excerpt: ranked.chunk.text.chars().take(EXCERPT_CHARS).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStats {
    /// Queries searched, including the original.
    pub queries_searched: usize,
    pub expansion_fell_back: bool,
    /// Distinct chunks after merging all passes.
    pub candidates: usize,
    pub chunks_used: usize,
    pub retrieval_time_ms: u64,
    pub total_time_ms: u64,
}

/// Wires the pipeline stages to injected providers.
pub struct RagPipeline {
    config: RagConfig,
    chunker: Chunker,
    expander: QueryExpander,
    reranker: Reranker,
    generator: AnswerGenerator,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("chunker", &self.chunker)
            .field("expander", &self.expander)
            .field("reranker", &self.reranker)
            .field("embedder", &self.embedder.name())
            .field("llm", &self.llm.model_name())
            .finish()
    }
}

impl RagPipeline {
    /// Validate `config` and assemble the stages.
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::from_config(&config.chunking)?;
        let expander = QueryExpander::new(
            config.retrieval.n_query_variants,
            config.retrieval.fetch_k,
        );
        let generator = AnswerGenerator::from_config(&config.generation);
        Ok(Self {
            config,
            chunker,
            expander,
            reranker: Reranker::default(),
            generator,
            embedder,
            llm,
        })
    }

    /// Replace the default lexical reranker.
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Chunk `documents` and produce a searchable index.
    ///
    /// With `index.dir` set, a valid persisted index is reused unless
    /// `force_rebuild` is on; otherwise the index lives in memory only.
    pub async fn ingest(&self, documents: &[Document]) -> Result<(IndexHandle, IngestReport)> {
        let (index, report) = self
            .prepare(documents, self.config.index.force_rebuild)
            .await?;
        Ok((IndexHandle::new(index), report))
    }

    /// Re-embed `documents` into a new index, then swap it into `handle`.
    ///
    /// On error `handle` keeps serving the previous index.
    pub async fn rebuild(&self, handle: &IndexHandle, documents: &[Document]) -> Result<IngestReport> {
        let (index, report) = self.prepare(documents, true).await?;
        handle.replace(index).await;
        info!(chunks = report.chunks, "Swapped in rebuilt index");
        Ok(report)
    }

    async fn prepare(
        &self,
        documents: &[Document],
        force_rebuild: bool,
    ) -> Result<(VectorIndex, IngestReport)> {
        let split = self.chunker.split(documents)?;
        let metric = self.config.retrieval.distance_metric;
        let batch_size = self.config.index.embed_batch_size;

        let (index, outcome) = match &self.config.index.dir {
            Some(dir) => {
                let prepared = IndexStore::new(dir)
                    .prepare(
                        &split.chunks,
                        self.embedder.as_ref(),
                        metric,
                        force_rebuild,
                        batch_size,
                    )
                    .await?;
                (prepared.index, prepared.outcome)
            }
            None => {
                let index =
                    build_index(&split.chunks, self.embedder.as_ref(), metric, batch_size).await?;
                (
                    index,
                    PrepareOutcome::Built {
                        reason: "in-memory index".into(),
                    },
                )
            }
        };

        let report = IngestReport {
            documents: documents.len(),
            chunks: split.chunks.len(),
            skipped_documents: split.skipped_documents,
            outcome,
        };
        info!(
            documents = report.documents,
            chunks = report.chunks,
            skipped = report.skipped_documents,
            indexed = index.len(),
            "Ingestion complete"
        );
        Ok((index, report))
    }

    /// Answer `query` against the index behind `handle`.
    ///
    /// The turn is appended to `memory` only when an answer was produced.
    pub async fn ask(
        &self,
        query: &str,
        handle: &IndexHandle,
        memory: &mut ChatMemory,
    ) -> Result<RagResponse> {
        let started = Instant::now();
        let index = handle.current().await;

        let expansion = self
            .expander
            .expand(query, &index, self.embedder.as_ref(), self.llm.as_ref())
            .await?;
        let candidates = expansion.candidates.len();

        let mut ranked = self.reranker.rerank(query, expansion.candidates);
        ranked.truncate(self.config.retrieval.top_k);
        let retrieval_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            variants = expansion.queries.len(),
            candidates,
            k = ranked.len(),
            elapsed_ms = retrieval_time_ms,
            "Retrieved context"
        );

        let answer = self
            .generator
            .generate(query, &ranked, memory, self.llm.as_ref())
            .await?;
        memory.add(query, answer.clone());

        Ok(RagResponse {
            answer,
            sources: ranked.iter().map(SourceReference::from).collect(),
            retrieval_stats: RetrievalStats {
                queries_searched: expansion.queries.len(),
                expansion_fell_back: expansion.fell_back,
                candidates,
                chunks_used: ranked.len(),
                retrieval_time_ms,
                total_time_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Top chunks for `query` without calling the model for an answer.
    pub async fn retrieve(&self, query: &str, handle: &IndexHandle) -> Result<Vec<Chunk>> {
        let index = handle.current().await;
        let expansion = self
            .expander
            .expand(query, &index, self.embedder.as_ref(), self.llm.as_ref())
            .await?;
        let mut ranked = self.reranker.rerank(query, expansion.candidates);
        ranked.truncate(self.config.retrieval.top_k);
        Ok(ranked.into_iter().map(|r| r.chunk).collect())
    }
}
