use super::{CodeGenerator, Completion, TokenUsage};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAIGenerator {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(base_url: String, model: String, api_key: String, max_tokens: u32) -> Self {
        Self {
            base_url,
            model,
            api_key,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Pulls every choice plus usage out of a chat-completions response body.
pub fn parse_completions(body: &Value) -> anyhow::Result<Vec<Completion>> {
    let choices = body
        .get("choices")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("chat API response missing choices"))?;
    let usage = TokenUsage {
        prompt_tokens: body
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        completion_tokens: body
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    };
    choices
        .iter()
        .map(|c| {
            let response = c
                .pointer("/message/content")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("chat API choice missing content"))?
                .to_string();
            Ok(Completion {
                response,
                usage: usage.clone(),
            })
        })
        .collect()
}

#[async_trait]
impl CodeGenerator for OpenAIGenerator {
    async fn generate(
        &self,
        prompt: &str,
        samples: u32,
        temperature: f32,
    ) -> anyhow::Result<Vec<Completion>> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
            "max_tokens": self.max_tokens,
            "n": samples.max(1),
        });

        let resp = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat API error: {}", error_text);
        }

        let json: Value = resp.json().await?;
        parse_completions(&json)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
