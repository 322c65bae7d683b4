//! Answer generation from retrieved context.

use async_trait::async_trait;

use crate::embedding::ApiKey;
use crate::error::Result;
use crate::history::ChatMessage;

/// System prompt used when none is configured. The assembled context is
/// appended after it.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, say that you don't know. \
Keep the answer concise.\n\n";

/// Instruction for rewriting a follow-up question into a standalone one.
pub const CONTEXTUALIZE_QUESTION_PROMPT: &str = "Given a chat history and the latest user \
question which might reference context in the chat history, formulate a standalone question \
which can be understood without the chat history. Do NOT answer the question, just reformulate \
it if needed and otherwise return it as is.";

/// Everything a generator needs to answer one question.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Instructions placed before the context.
    pub system_prompt: String,
    /// Retrieved chunk texts in rank order.
    pub context: String,
    /// Earlier turns of the conversation, oldest first.
    pub history: Vec<ChatMessage>,
    /// The question to answer.
    pub question: String,
}

/// A generative model consuming assembled context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Produce an answer for `request`.
    async fn generate(&self, credential: &ApiKey, request: &GenerationRequest) -> Result<String>;

    /// Rewrite `question` so it stands on its own without `history`.
    ///
    /// The default returns the question unchanged.
    async fn condense_question(
        &self,
        _credential: &ApiKey,
        _history: &[ChatMessage],
        question: &str,
    ) -> Result<String> {
        Ok(question.to_string())
    }
}
