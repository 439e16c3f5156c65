use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// PromptBuilder Trait
// =============================================================================

#[async_trait]
pub trait PromptBuilder: Send + Sized {
    /// System instruction sent alongside the prompt.
    fn preamble(self, preamble: impl Into<String>) -> Self;
    fn temperature(self, temperature: f32) -> Self;
    async fn send(self) -> Result<String>;
}
