// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Remote classification providers
//!
//! Each provider is a thin `reqwest` client that turns a prompt into raw
//! model text. Prompt construction, parsing and retry live in
//! [`crate::remote`].

pub mod claude;
pub mod gemini;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::{FoldwiseError, Result};

pub use claude::ClaudeProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Outcome of a single provider call
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A remote text (and optionally vision) model
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// Provider identifier used in logs
    fn name(&self) -> &str;

    /// Model the provider sends requests to
    fn model(&self) -> &str;

    /// Whether [`RemoteProvider::complete_vision`] is implemented
    fn supports_vision(&self) -> bool {
        false
    }

    /// Send a text prompt and return the model's raw reply
    async fn complete(&self, prompt: &str) -> ProviderResult<String>;

    /// Send a prompt with one base64-encoded image
    async fn complete_vision(
        &self,
        _prompt: &str,
        _image_base64: &str,
        _mime_type: &str,
    ) -> ProviderResult<String> {
        Err(ProviderError::Unsupported(format!(
            "{} does not support image classification",
            self.name()
        )))
    }

    /// Check the endpoint is reachable
    async fn health_check(&self) -> ProviderResult<()> {
        Ok(())
    }
}

/// Build the configured provider
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn RemoteProvider>> {
    let client = http_client(config)?;

    let provider: Arc<dyn RemoteProvider> = match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(client, config, require_key(config)?)),
        ProviderKind::Claude => Arc::new(ClaudeProvider::new(client, config, require_key(config)?)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(client, config, require_key(config)?)),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(client, config)),
    };

    tracing::info!(
        "Using {} provider with model {}",
        provider.name(),
        provider.model()
    );
    Ok(provider)
}

fn http_client(config: &ProviderConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout() + Duration::from_secs(5))
        .build()
        .map_err(|e| FoldwiseError::Config(format!("Failed to create HTTP client: {}", e)))
}

fn require_key(config: &ProviderConfig) -> Result<String> {
    config.resolve_api_key().ok_or_else(|| {
        let hint = config
            .api_key_env()
            .map(|var| format!(" (set provider.api_key or {})", var))
            .unwrap_or_default();
        FoldwiseError::Config(format!("No API key configured for {}{}", config.kind, hint))
    })
}

/// Strip a trailing slash and any endpoint path the user pasted in
pub(crate) fn normalize_base_url(url: &str, suffixes: &[&str]) -> String {
    let mut url = url.trim().trim_end_matches('/').to_string();
    for suffix in suffixes {
        if let Some(stripped) = url.strip_suffix(suffix) {
            url = stripped.trim_end_matches('/').to_string();
        }
    }
    url
}

/// Map a non-success response into a provider error, consuming its body
pub(crate) async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status, &body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("http://localhost:11434/api/generate/", &["/api/generate", "/api/chat"]),
            "http://localhost:11434"
        );
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/", &["/chat/completions"]),
            "https://api.openai.com/v1"
        );
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = ProviderConfig {
            kind: ProviderKind::Claude,
            api_key: Some(String::new()),
            ..ProviderConfig::default()
        };
        // Only fails if the conventional variable is unset in the test env
        if std::env::var("ANTHROPIC_API_KEY").is_err() {
            assert!(matches!(create_provider(&config), Err(FoldwiseError::Config(_))));
        }
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = ProviderConfig {
            kind: ProviderKind::Ollama,
            model: "llama3.2".to_string(),
            ..ProviderConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "llama3.2");
    }
}
