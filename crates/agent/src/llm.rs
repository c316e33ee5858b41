use anyhow::Result;
use async_trait::async_trait;

/// Provider-agnostic completion interface. Which model or vendor backs it
/// is decided by the surrounding application.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f64) -> Result<String>;
}
