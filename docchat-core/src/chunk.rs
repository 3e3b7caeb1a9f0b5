//! Sliding-window document chunking.
//!
//! A window of `chunk_size` units moves over each document in steps of
//! `chunk_size - chunk_overlap`. Once the units left from the window start
//! fit in one window, they form the final (possibly shorter) chunk.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::types::{Chunk, Document};

/// Unit the window length and overlap are measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkUnit {
    /// Unicode scalar values.
    Characters,
    /// Whitespace-separated words, rejoined with a single space.
    Words,
    /// `cl100k_base` BPE tokens.
    Tokens,
}

/// Chunks produced by one [`Chunker::split`] call.
#[derive(Debug, Clone, Default)]
pub struct ChunkOutput {
    pub chunks: Vec<Chunk>,
    /// Documents with no text after extraction; they produce no chunks.
    pub skipped_documents: usize,
}

/// Splits documents into overlapping chunks.
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    unit: ChunkUnit,
    bpe: Option<tiktoken_rs::CoreBPE>,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("unit", &self.unit)
            .finish()
    }
}

impl Chunker {
    /// Create a chunker, rejecting `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize, unit: ChunkUnit) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(RagError::invalid_config(format!(
                "chunk_size ({chunk_size}) must be greater than chunk_overlap ({chunk_overlap})"
            )));
        }
        let bpe = match unit {
            ChunkUnit::Tokens => Some(tiktoken_rs::cl100k_base().map_err(|e| {
                RagError::Tokenizer {
                    message: format!("Failed to load cl100k_base: {e}"),
                }
            })?),
            ChunkUnit::Characters | ChunkUnit::Words => None,
        };
        Ok(Self {
            chunk_size,
            chunk_overlap,
            unit,
            bpe,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap, config.unit)
    }

    pub fn unit(&self) -> ChunkUnit {
        self.unit
    }

    /// Split documents in order; chunks keep document order, then window order.
    pub fn split(&self, documents: &[Document]) -> Result<ChunkOutput> {
        let mut output = ChunkOutput::default();
        for doc in documents {
            if doc.text.trim().is_empty() {
                debug!(document = %doc.source_name, "Skipping empty document");
                output.skipped_documents += 1;
                continue;
            }
            let texts = self.split_text(&doc.text)?;
            output
                .chunks
                .extend(texts.into_iter().enumerate().map(|(idx, text)| Chunk {
                    id: Chunk::chunk_id(&doc.id, idx),
                    text,
                    source_document_id: doc.id.clone(),
                    source_name: doc.source_name.clone(),
                    sequence_index: idx,
                }));
        }
        info!(
            documents = documents.len(),
            chunks = output.chunks.len(),
            skipped = output.skipped_documents,
            unit = ?self.unit,
            "Split documents into chunks"
        );
        Ok(output)
    }

    /// Split a single text into window texts.
    pub fn split_text(&self, text: &str) -> Result<Vec<String>> {
        match self.unit {
            ChunkUnit::Characters => {
                let chars: Vec<char> = text.chars().collect();
                Ok(self
                    .windows(chars.len())
                    .map(|(start, end)| chars[start..end].iter().collect())
                    .collect())
            }
            ChunkUnit::Words => {
                let words: Vec<&str> = text.split_whitespace().collect();
                Ok(self
                    .windows(words.len())
                    .map(|(start, end)| words[start..end].join(" "))
                    .collect())
            }
            ChunkUnit::Tokens => {
                let Some(bpe) = &self.bpe else {
                    return Err(RagError::Tokenizer {
                        message: "token chunker constructed without a tokenizer".into(),
                    });
                };
                let tokens = bpe.encode_with_special_tokens(text);
                // Window edges may split a multi-byte character; those bytes
                // decode to U+FFFD instead of failing the document.
                Ok(self
                    .windows(tokens.len())
                    .map(|(start, end)| {
                        let bytes: Vec<u8> = bpe
                            ._decode_native_and_split(tokens[start..end].to_vec())
                            .flatten()
                            .collect();
                        String::from_utf8_lossy(&bytes).into_owned()
                    })
                    .collect())
            }
        }
    }

    /// Half-open unit ranges of every window over a sequence of `len` units.
    pub fn windows(&self, len: usize) -> impl Iterator<Item = (usize, usize)> + use<> {
        let size = self.chunk_size;
        let step = self.chunk_size - self.chunk_overlap;
        let mut start = 0;
        let mut done = len == 0;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            if len - start <= size {
                done = true;
                return Some((start, len));
            }
            let window = (start, start + size);
            start += step;
            Some(window)
        })
    }
}

/// Split `documents` with a one-off chunker.
pub fn split_documents(
    documents: &[Document],
    chunk_size: usize,
    chunk_overlap: usize,
    unit: ChunkUnit,
) -> Result<ChunkOutput> {
    Chunker::new(chunk_size, chunk_overlap, unit)?.split(documents)
}
