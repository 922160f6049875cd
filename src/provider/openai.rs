// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! OpenAI-compatible chat completions client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{check_status, normalize_base_url, ProviderResult, RemoteProvider};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(client: Client, config: &ProviderConfig, api_key: String) -> Self {
        let base_url = normalize_base_url(
            config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            &["/chat/completions"],
        );
        Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    async fn send(&self, content: Value) -> ProviderResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!("Sending request to OpenAI: model={}", self.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let result: ChatResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("response has no message content".to_string()))
    }
}

#[async_trait]
impl RemoteProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_vision(&self) -> bool {
        true
    }

    async fn complete(&self, prompt: &str) -> ProviderResult<String> {
        self.send(Value::String(prompt.to_string())).await
    }

    async fn complete_vision(
        &self,
        prompt: &str,
        image_base64: &str,
        mime_type: &str,
    ) -> ProviderResult<String> {
        let content = json!([
            { "type": "text", "text": prompt },
            {
                "type": "image_url",
                "image_url": { "url": format!("data:{};base64,{}", mime_type, image_base64) }
            }
        ]);
        self.send(content).await
    }
}
