// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for foldwise

use thiserror::Error;

/// Result type alias for foldwise operations
pub type Result<T> = std::result::Result<T, FoldwiseError>;

/// foldwise error types
#[derive(Error, Debug)]
pub enum FoldwiseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("History error: {0}")]
    History(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

/// Failures reported by a remote classification provider.
///
/// Only [`ProviderError::Transient`] is retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Rate limiting, timeouts, connectivity, server-side 5xx
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Bad request, authentication, unknown model
    #[error("provider rejected the request: {0}")]
    Permanent(String),

    /// The response arrived but did not contain the expected structure
    #[error("could not parse provider response: {0}")]
    Parse(String),

    /// The provider lacks the requested capability (e.g. vision)
    #[error("unsupported by provider: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP status from a provider endpoint.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, truncate(body, 200))
        };

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status, "")
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
