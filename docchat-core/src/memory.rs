//! Session conversation history.

use crate::types::ChatTurn;

/// Append-only record of question/answer turns for one session.
///
/// Turns are never edited or removed. Prompt size is bounded at render time
/// through [`ChatMemory::render_for_prompt`].
#[derive(Debug, Clone, Default)]
pub struct ChatMemory {
    turns: Vec<ChatTurn>,
}

impl ChatMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, query: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(ChatTurn::new(query, answer));
    }

    /// All turns, oldest first.
    pub fn history(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Format the most recent `max_turns` turns (all when `None`) as a
    /// conversation block. Asking for more turns than exist renders them all.
    pub fn render_for_prompt(&self, max_turns: Option<usize>) -> String {
        let skip = max_turns
            .map(|n| self.turns.len().saturating_sub(n))
            .unwrap_or(0);
        self.turns[skip..]
            .iter()
            .map(|turn| format!("User: {}\nAssistant: {}", turn.query_text, turn.answer_text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
