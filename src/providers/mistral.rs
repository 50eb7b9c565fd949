use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::config::ProviderConfig;
use crate::providers::ProviderError;
use crate::traits::TextCompletion;
use crate::types::ChatTurn;

/// Chat-completion client for the Mistral API (OpenAI-compatible wire shape).
/// One bounded attempt per call; callers own their fallback behavior.
pub struct MistralProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl MistralProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextCompletion for MistralProvider {
    async fn complete(
        &self,
        system: &str,
        history: &[ChatTurn],
        user: &str,
    ) -> anyhow::Result<String> {
        let mut messages = vec![json!({"role": "system", "content": system})];
        for turn in history {
            messages.push(json!({"role": turn.role, "content": turn.content}));
        }
        messages.push(json!({"role": "user", "content": user}));

        let body = json!({
            "model": self.model,
            "messages": messages,
        });

        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, history = history.len(), "Calling completion API");

        let resp = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("HTTP request failed: {}", e);
                return Err(ProviderError::network(&e).into());
            }
        };

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            error!(status = %status, "Provider API error: {}", text);
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }

        let data: Value = serde_json::from_str(&text)?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("no content in completion response"))
    }
}
