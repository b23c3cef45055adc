/// LLM service port trait
///
/// Defines the interface for Large Language Model services used by the
/// post-conversation jobs (titles, summaries, memory fact extraction).
use crate::error::Result;
use async_trait::async_trait;

/// Port trait for LLM services
#[async_trait]
pub trait LlmServicePort: Send + Sync {
    /// Complete a prompt; returns the generated text
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;

    /// Embed a piece of text for vector storage
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the provider name
    fn provider_name(&self) -> &str;
}
