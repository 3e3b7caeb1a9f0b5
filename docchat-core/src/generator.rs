//! Grounded answer generation.

use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::llm::LanguageModel;
use crate::memory::ChatMemory;
use crate::reranker::RankedChunk;

/// Builds the answer prompt and makes the single model call.
#[derive(Debug, Clone)]
pub struct AnswerGenerator {
    system_prompt: String,
    memory_turns: Option<usize>,
}

impl AnswerGenerator {
    pub fn new(system_prompt: impl Into<String>, memory_turns: Option<usize>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            memory_turns,
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(config.system_prompt.clone(), config.memory_turns)
    }

    /// Instruction, then context chunks in the given order, then the
    /// conversation so far, then the question. Same inputs, same prompt.
    pub fn build_prompt(&self, query: &str, chunks: &[RankedChunk], memory: &ChatMemory) -> String {
        let mut prompt = String::new();
        prompt.push_str(self.system_prompt.trim());
        prompt.push_str("\n\nContext:\n");
        for ranked in chunks {
            prompt.push_str(&format!(
                "[{}] {}\n\n",
                ranked.chunk.source_name,
                ranked.chunk.text.trim()
            ));
        }

        let history = memory.render_for_prompt(self.memory_turns);
        if !history.is_empty() {
            prompt.push_str("Conversation so far:\n");
            prompt.push_str(&history);
            prompt.push_str("\n\n");
        }

        prompt.push_str("Question: ");
        prompt.push_str(query);
        prompt.push_str("\nAnswer:");
        prompt
    }

    /// Ask the model once. Model failures and blank answers are `Generation` errors.
    pub async fn generate(
        &self,
        query: &str,
        chunks: &[RankedChunk],
        memory: &ChatMemory,
        llm: &dyn LanguageModel,
    ) -> Result<String> {
        let prompt = self.build_prompt(query, chunks, memory);
        debug!(
            model = llm.model_name(),
            context_chunks = chunks.len(),
            prompt_chars = prompt.len(),
            "Generating answer"
        );
        let answer = llm.complete(&prompt).await.map_err(|e| match e {
            RagError::Generation { .. } => e,
            other => RagError::generation(other.to_string()),
        })?;
        if answer.trim().is_empty() {
            return Err(RagError::generation(format!(
                "{} returned an empty answer",
                llm.model_name()
            )));
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLanguageModel;
    use crate::types::Chunk;

    fn ranked(id: &str, text: &str) -> RankedChunk {
        RankedChunk {
            chunk: Chunk {
                id: id.into(),
                text: text.into(),
                source_document_id: "doc".into(),
                source_name: "notes.txt".into(),
                sequence_index: 0,
            },
            score: 1.0,
            distance: 0.0,
        }
    }

    #[test]
    fn test_prompt_section_order() {
        let generator = AnswerGenerator::new("Answer from context.", None);
        let mut memory = ChatMemory::new();
        memory.add("earlier question", "earlier answer");
        let prompt = generator.build_prompt(
            "What color is the sky?",
            &[ranked("a", "first chunk"), ranked("b", "second chunk")],
            &memory,
        );

        let positions: Vec<usize> = [
            "Answer from context.",
            "first chunk",
            "second chunk",
            "earlier question",
            "Question: What color is the sky?",
        ]
        .iter()
        .map(|needle| prompt.find(needle).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{prompt}");
    }

    #[test]
    fn test_prompt_respects_memory_turns() {
        let generator = AnswerGenerator::new("sys", Some(1));
        let mut memory = ChatMemory::new();
        memory.add("old", "old answer");
        memory.add("new", "new answer");
        let prompt = generator.build_prompt("q", &[], &memory);
        assert!(prompt.contains("User: new"));
        assert!(!prompt.contains("User: old"));
    }

    #[test]
    fn test_prompt_without_history_has_no_conversation_block() {
        let generator = AnswerGenerator::new("sys", None);
        let prompt = generator.build_prompt("q", &[ranked("a", "x")], &ChatMemory::new());
        assert!(!prompt.contains("Conversation so far"));
    }

    #[tokio::test]
    async fn test_generate_returns_model_text() {
        let llm = MockLanguageModel::with_response("The sky is blue.");
        let answer = AnswerGenerator::new("sys", None)
            .generate("q", &[ranked("a", "sky is blue")], &ChatMemory::new(), &llm)
            .await
            .unwrap();
        assert_eq!(answer, "The sky is blue.");
        assert_eq!(llm.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_generate_blank_answer_is_error() {
        let llm = MockLanguageModel::with_response("   \n");
        let err = AnswerGenerator::new("sys", None)
            .generate("q", &[], &ChatMemory::new(), &llm)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Generation { .. }));
    }

    #[tokio::test]
    async fn test_generate_does_not_retry() {
        let llm = MockLanguageModel::with_response("never reached");
        llm.queue_error(RagError::generation("rate limited"));
        let err = AnswerGenerator::new("sys", None)
            .generate("q", &[], &ChatMemory::new(), &llm)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
        assert_eq!(llm.prompts().len(), 1);
    }
}
