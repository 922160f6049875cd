// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Google Gemini `generateContent` client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_status, normalize_base_url, ProviderResult, RemoteProvider};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-pro";

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiProvider {
    pub fn new(client: Client, config: &ProviderConfig, api_key: String) -> Self {
        let base_url = normalize_base_url(
            config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            &[],
        );
        let model = if config.model.contains("gemini") {
            config.model.clone()
        } else {
            DEFAULT_MODEL.to_string()
        };
        Self {
            client,
            base_url,
            api_key,
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl RemoteProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> ProviderResult<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        debug!("Sending request to Gemini: model={}", self.model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let result: GenerateResponse = response.json().await?;
        result
            .candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| ProviderError::Parse("response has no candidates".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_defaults() {
        let provider = GeminiProvider::new(Client::new(), &ProviderConfig::default(), "k".to_string());
        assert_eq!(provider.model(), DEFAULT_MODEL);

        let config = ProviderConfig {
            model: "gemini-1.5-flash".to_string(),
            ..ProviderConfig::default()
        };
        let provider = GeminiProvider::new(Client::new(), &config, "k".to_string());
        assert_eq!(provider.model(), "gemini-1.5-flash");
    }
}
