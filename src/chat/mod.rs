// Retrieval-generation pipeline
// Retrieve context chunks, generate an answer, then record the turn

#[cfg(test)]
mod tests;

use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::VectorStore;
use crate::llm::{ChatMessage, LanguageModel};
use crate::memory::{ConversationMemory, Turn};
use crate::{KnowledgeError, Result};

pub const SYSTEM_PROMPT: &str = "You are a professional knowledge base assistant. \
Answer the user's question by combining the known information and the conversation history. \
Use at most three sentences, and keep the answer concise and to the point.";

/// Chunks retrieved per question unless configured otherwise
pub const DEFAULT_TOP_K: usize = 4;

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Steps of a single query, always run in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Retrieve,
    Generate,
}

impl Stage {
    pub const SEQUENCE: [Self; 2] = [Self::Retrieve, Self::Generate];
}

/// Everything known about one query while it runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryState {
    pub question: String,
    /// Retrieved chunk texts, nearest first
    pub context: Vec<String>,
    /// Prior turns of the conversation, oldest first
    pub history: Vec<Turn>,
    pub answer: String,
}

impl QueryState {
    #[inline]
    pub fn new(question: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            question: question.into(),
            history,
            ..Self::default()
        }
    }
}

/// Answers questions from indexed documents and conversation history
pub struct ChatPipeline {
    index: Arc<VectorStore>,
    model: Arc<dyn LanguageModel>,
    memory: Arc<ConversationMemory>,
    top_k: usize,
}

impl std::fmt::Debug for ChatPipeline {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPipeline")
            .field("index", &self.index)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl ChatPipeline {
    #[inline]
    pub fn new(
        index: Arc<VectorStore>,
        model: Arc<dyn LanguageModel>,
        memory: Arc<ConversationMemory>,
    ) -> Self {
        Self {
            index,
            model,
            memory,
            top_k: DEFAULT_TOP_K,
        }
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    #[inline]
    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    /// Answer `question` within the conversation `conversation_id`.
    ///
    /// The turn is recorded only after an answer has been generated; a failed
    /// generation leaves the conversation untouched. The conversation cannot
    /// expire while the answer is being generated.
    #[inline]
    pub async fn ask(&self, conversation_id: &str, question: &str) -> Result<String> {
        let pending = self.memory.begin_turn(conversation_id).await;

        debug!(
            "Answering question in conversation {} with {} prior turns",
            conversation_id,
            pending.history().len()
        );

        let mut state = QueryState::new(question, pending.history().to_vec());
        for stage in Stage::SEQUENCE {
            self.run_stage(stage, &mut state).await?;
        }

        self.memory
            .complete_turn(pending, &state.question, &state.answer)
            .await;

        info!(
            "Answered question in conversation {} using {} context chunks",
            conversation_id,
            state.context.len()
        );
        Ok(state.answer)
    }

    async fn run_stage(&self, stage: Stage, state: &mut QueryState) -> Result<()> {
        match stage {
            Stage::Retrieve => {
                state.context = self.index.query(&state.question, self.top_k).await?;
                debug!("Retrieved {} context chunks", state.context.len());
            }
            Stage::Generate => {
                let messages = build_prompt(state);
                let reply = self.model.complete(&messages).await.map_err(|e| match e {
                    KnowledgeError::GenerationFailed(_) => e,
                    other => KnowledgeError::GenerationFailed(other.to_string()),
                })?;

                let answer = reply.trim();
                if answer.is_empty() {
                    warn!("Language model returned an empty answer");
                    return Err(KnowledgeError::GenerationFailed(
                        "language model returned an empty answer".to_string(),
                    ));
                }
                state.answer = answer.to_string();
            }
        }
        Ok(())
    }
}

/// Assemble the chat prompt: system instruction, prior turns, then the question with its context
#[inline]
pub fn build_prompt(state: &QueryState) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2 + state.history.len() * 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));

    for turn in &state.history {
        messages.push(ChatMessage::user(turn.user.as_str()));
        messages.push(ChatMessage::assistant(turn.assistant.as_str()));
    }

    let context = if state.context.is_empty() {
        "(none)".to_string()
    } else {
        state.context.iter().join(CONTEXT_SEPARATOR)
    };

    messages.push(ChatMessage::user(format!(
        "Question: {}\nKnown information:\n{}\nAnswer:",
        state.question, context
    )));
    messages
}
