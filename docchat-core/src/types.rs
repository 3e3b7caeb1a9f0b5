//! Plain data records flowing through the pipeline.

use serde::{Deserialize, Serialize};

/// A source document handed in by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub source_name: String,
}

impl Document {
    /// Create a document with a freshly generated id.
    pub fn new(text: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            source_name: source_name.into(),
        }
    }

    /// Create a document with a caller-chosen id.
    pub fn with_id(
        id: impl Into<String>,
        text: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_name: source_name.into(),
        }
    }
}

/// A bounded text segment of a document; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source_document_id: String,
    pub source_name: String,
    pub sequence_index: usize,
}

impl Chunk {
    pub(crate) fn chunk_id(document_id: &str, sequence_index: usize) -> String {
        format!("{document_id}-chunk-{sequence_index}")
    }
}

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub query_text: String,
    pub answer_text: String,
}

impl ChatTurn {
    pub fn new(query_text: impl Into<String>, answer_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            answer_text: answer_text.into(),
        }
    }
}
