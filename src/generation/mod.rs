// Answer generation module
// Chat model seam and the grounded, cited answer built on top of it

pub mod answer;
pub mod ollama;

pub use answer::{AnswerBundle, AnswerGenerator, AnswerSource, NO_INFORMATION_ANSWER};
pub use ollama::OllamaChatClient;

use crate::Result;

/// A hosted text-generation model.
///
/// Every failure (transport, quota, timeout, malformed completion) is
/// reported as [`crate::SearchError::Generation`] so callers can degrade.
pub trait ChatModel: Send + Sync {
    /// Model identifier, for logs
    fn model(&self) -> &str;

    /// One non-streaming completion of `prompt` under the `system`
    /// instruction, capped at `max_tokens` output tokens
    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String>;
}
