//! Language model client
//!
//! The pipeline only depends on the `LanguageModel` trait; the shipped
//! implementation talks to an OpenAI-compatible chat-completions endpoint.

use crate::error::{BridgeError, Result};
use crate::prompts::SYSTEM_PROMPT;
use async_trait::async_trait;

/// The single capability the pipeline needs from an inference engine.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct HttpLlmClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client for LLM");
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        }
    }

    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let base_url = std::env::var("SQLBRIDGE_LLM_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("SQLBRIDGE_LLM_MODEL").unwrap_or_else(|_| "gpt-4".to_string());
        Self::new(api_key, base_url, model)
    }
}

#[async_trait]
impl LanguageModel for HttpLlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 500
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::Llm(format!(
                "LLM API returned status {}: {}",
                status, text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BridgeError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| BridgeError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = HttpLlmClient::new(
            "key".to_string(),
            "http://localhost:8000/v1/".to_string(),
            "test-model".to_string(),
        );
        assert_eq!(client.base_url, "http://localhost:8000/v1");
    }
}
