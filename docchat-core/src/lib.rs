//! # Docchat Core
//!
//! Retrieval pipeline for answering questions over a document set.
//! Provides chunking, an exact vector index with on-disk persistence,
//! query expansion, reranking, conversation memory and grounded answer
//! generation. Embedding and language model backends are injected through
//! the [`EmbeddingProvider`] and [`LanguageModel`] traits.

pub mod chunk;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod expand;
pub mod generator;
pub mod index;
pub mod llm;
pub mod memory;
pub mod persistence;
pub mod pipeline;
pub mod reranker;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root.
pub use chunk::{ChunkOutput, ChunkUnit, Chunker, split_documents};
pub use config::{RagConfig, load_config};
pub use embeddings::{EmbeddingProvider, LocalEmbedder, OpenAiEmbedder, create_embedder};
pub use error::{RagError, Result};
pub use expand::{Candidate, Expansion, QueryExpander};
pub use generator::AnswerGenerator;
pub use index::{DistanceMetric, IndexEntry, SearchHit, VectorIndex};
pub use llm::{LanguageModel, MockLanguageModel, OpenAiChatModel, create_language_model};
pub use memory::ChatMemory;
pub use pipeline::{
    IndexHandle, IngestReport, RagPipeline, RagResponse, RetrievalStats, SourceReference,
};
pub use reranker::{LexicalOverlapScorer, RankedChunk, RelevanceScorer, Reranker};
pub use store::{IndexInfo, IndexStore, PrepareOutcome, PreparedIndex, build_index};
pub use types::{ChatTurn, Chunk, Document};
