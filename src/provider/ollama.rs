// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama API client for local inference

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{check_status, normalize_base_url, ProviderResult, RemoteProvider};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const VISION_MODEL_MARKERS: &[&str] = &["llava", "vision", "moondream", "bakllava", "minicpm-v"];

/// Ollama API client
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<&'a str>>,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaProvider {
    pub fn new(client: Client, config: &ProviderConfig) -> Self {
        let base_url = normalize_base_url(
            config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            &["/api/generate", "/api/chat"],
        );
        Self {
            client,
            base_url,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// List available models
    pub async fn list_models(&self) -> ProviderResult<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = check_status(self.client.get(&url).send().await?).await?;
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn generate(&self, prompt: &str, images: Option<Vec<&str>>) -> ProviderResult<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
            images,
        };

        debug!("Sending request to Ollama: model={}", self.model);

        let response = self.client.post(&url).json(&request).send().await?;
        let response = check_status(response).await?;

        let result: GenerateResponse = response.json().await?;
        Ok(result.response)
    }
}

#[async_trait]
impl RemoteProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_vision(&self) -> bool {
        let model = self.model.to_lowercase();
        VISION_MODEL_MARKERS.iter().any(|m| model.contains(m))
    }

    async fn complete(&self, prompt: &str) -> ProviderResult<String> {
        self.generate(prompt, None).await
    }

    async fn complete_vision(
        &self,
        prompt: &str,
        image_base64: &str,
        _mime_type: &str,
    ) -> ProviderResult<String> {
        self.generate(prompt, Some(vec![image_base64])).await
    }

    /// Check Ollama is reachable and the configured model is pulled
    async fn health_check(&self) -> ProviderResult<()> {
        let url = format!("{}/api/tags", self.base_url);
        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                ProviderError::Transient(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        let models = self.list_models().await?;
        let found = models
            .iter()
            .any(|m| m.starts_with(&self.model) || *m == format!("{}:latest", self.model));
        if found {
            Ok(())
        } else {
            Err(ProviderError::Permanent(format!(
                "Model '{}' not found. Run: ollama pull {}",
                self.model, self.model
            )))
        }
    }
}
