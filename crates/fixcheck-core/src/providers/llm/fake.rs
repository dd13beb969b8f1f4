use super::{CodeGenerator, Completion, TokenUsage};
use async_trait::async_trait;

/// Returns canned responses in order, cycling when exhausted.
pub struct FakeGenerator {
    pub responses: Vec<String>,
}

#[async_trait]
impl CodeGenerator for FakeGenerator {
    async fn generate(
        &self,
        prompt: &str,
        samples: u32,
        _temperature: f32,
    ) -> anyhow::Result<Vec<Completion>> {
        if self.responses.is_empty() {
            anyhow::bail!("fake generator has no responses");
        }
        Ok((0..samples as usize)
            .map(|i| {
                let response = self.responses[i % self.responses.len()].clone();
                Completion {
                    usage: TokenUsage {
                        prompt_tokens: prompt.split_whitespace().count() as u64,
                        completion_tokens: response.split_whitespace().count() as u64,
                    },
                    response,
                }
            })
            .collect())
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}
