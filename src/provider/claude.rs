// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Anthropic messages API client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_status, normalize_base_url, ProviderResult, RemoteProvider};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl ClaudeProvider {
    pub fn new(client: Client, config: &ProviderConfig, api_key: String) -> Self {
        let base_url = normalize_base_url(
            config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            &["/v1/messages"],
        );
        // A model name carried over from another provider is not usable here
        let model = if config.model.contains("claude") {
            config.model.clone()
        } else {
            DEFAULT_MODEL.to_string()
        };
        Self {
            client,
            base_url,
            api_key,
            model,
            temperature: config.temperature.min(1.0),
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl RemoteProvider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> ProviderResult<String> {
        let url = format!("{}/v1/messages", self.base_url);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Sending request to Claude: model={}", self.model);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let result: MessagesResponse = response.json().await?;
        result
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| ProviderError::Parse("response has no text block".to_string()))
    }
}
