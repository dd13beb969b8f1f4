use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub response: String,
    pub usage: TokenUsage,
}

/// Produces candidate fixes for a prompt. One `Completion` per sample.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        samples: u32,
        temperature: f32,
    ) -> anyhow::Result<Vec<Completion>>;
    fn provider_name(&self) -> &'static str;
}

pub mod fake;
pub mod openai;
