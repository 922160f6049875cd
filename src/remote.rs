// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Remote classification: prompt, retry, parse

use base64::Engine;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::classifier::ClassificationRequest;
use crate::config::{PromptConfig, ProviderConfig};
use crate::error::ProviderError;
use crate::provider::{ProviderResult, RemoteProvider};

/// Confidence assumed when the model omits it
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Structured answer extracted from a model reply
#[derive(Debug, Clone, PartialEq)]
pub struct ModelVerdict {
    pub folder_name: String,
    pub category: String,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(alias = "folderName")]
    folder_name: String,
    category: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

/// Classifies files through exactly one configured provider
pub struct RemoteClassifier {
    provider: Arc<dyn RemoteProvider>,
    prompts: PromptConfig,
    max_attempts: u32,
    base_delay: Duration,
    timeout: Duration,
}

impl RemoteClassifier {
    pub fn new(
        provider: Arc<dyn RemoteProvider>,
        config: &ProviderConfig,
        prompts: &PromptConfig,
    ) -> Self {
        Self {
            provider,
            prompts: prompts.clone(),
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
            timeout: config.timeout(),
        }
    }

    /// Override the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override attempt count and backoff base
    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    pub fn provider(&self) -> &Arc<dyn RemoteProvider> {
        &self.provider
    }

    pub fn supports_vision(&self) -> bool {
        self.provider.supports_vision()
    }

    /// Fill the classification template for `request`
    pub fn build_prompt(&self, request: &ClassificationRequest) -> String {
        let content_length = request.content.chars().count();
        let excerpt: String = request.content.chars().take(self.prompts.content_limit).collect();
        let excerpt = if excerpt.trim().is_empty() {
            "(no text content available)".to_string()
        } else {
            excerpt
        };

        self.prompts
            .classification
            .replace("{filename}", &request.filename)
            .replace("{file_type}", &request.extension)
            .replace("{content_length}", &content_length.to_string())
            .replace("{content}", &excerpt)
    }

    pub fn build_vision_prompt(&self, request: &ClassificationRequest) -> String {
        self.prompts
            .vision
            .replace("{filename}", &request.filename)
            .replace("{file_type}", &request.extension)
    }

    /// Classify from extracted text
    pub async fn classify(&self, request: &ClassificationRequest) -> ProviderResult<ModelVerdict> {
        let prompt = self.build_prompt(request);
        let text = self.with_retry_policy(|| self.provider.complete(&prompt)).await?;
        parse_verdict(&text)
    }

    /// Classify from image bytes; requires a vision-capable provider
    pub async fn classify_image(
        &self,
        request: &ClassificationRequest,
        image: &[u8],
        mime_type: &str,
    ) -> ProviderResult<ModelVerdict> {
        if !self.provider.supports_vision() {
            return Err(ProviderError::Unsupported(format!(
                "{} has no vision support",
                self.provider.name()
            )));
        }
        let prompt = self.build_vision_prompt(request);
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let text = self
            .with_retry_policy(|| self.provider.complete_vision(&prompt, &encoded, mime_type))
            .await?;
        parse_verdict(&text)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    async fn with_retry_policy<F, Fut>(&self, mut call: F) -> ProviderResult<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<String>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = self.base_delay * 2u32.saturating_pow(attempt - 2);
                warn!(
                    "Retrying {} request in {:?} (attempt {}/{})",
                    self.provider.name(),
                    delay,
                    attempt,
                    self.max_attempts
                );
                tokio::time::sleep(delay).await;
            }

            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Transient(format!(
                    "request timed out after {:?}",
                    self.timeout
                ))),
            };

            match outcome {
                Ok(text) => {
                    debug!("{} answered on attempt {}", self.provider.name(), attempt);
                    return Ok(text);
                }
                Err(e) if e.is_transient() => {
                    debug!("Transient failure from {}: {}", self.provider.name(), e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::Transient("no attempt was made".to_string())))
    }
}

/// Parse a model reply into a verdict
pub fn parse_verdict(text: &str) -> ProviderResult<ModelVerdict> {
    let body = strip_code_fence(text);
    let raw: RawVerdict = serde_json::from_str(body)
        .map_err(|e| ProviderError::Parse(format!("invalid verdict JSON: {}", e)))?;

    let confidence = raw
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    Ok(ModelVerdict {
        folder_name: raw.folder_name,
        category: raw.category,
        confidence,
        reason: raw.reason.unwrap_or_default(),
    })
}

/// Remove a surrounding ``` / ```json fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches("json"),
    };
    rest.trim_end().trim_end_matches("```").trim()
}

/// MIME type for image extensions a vision model can read
pub fn image_mime_type(extension: &str) -> Option<&'static str> {
    match extension.trim_start_matches('.').to_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider replaying a fixed script of replies
    pub(crate) struct ScriptedProvider {
        replies: Mutex<VecDeque<ProviderResult<String>>>,
        pub calls: AtomicUsize,
        attempts: Mutex<Vec<tokio::time::Instant>>,
        vision: bool,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(replies: Vec<ProviderResult<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                attempts: Mutex::new(Vec::new()),
                vision: false,
                delay: None,
            }
        }

        pub(crate) fn with_vision(mut self) -> Self {
            self.vision = true;
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// When each call arrived
        pub(crate) fn attempt_times(&self) -> Vec<tokio::time::Instant> {
            self.attempts.lock().unwrap().clone()
        }

        async fn next(&self) -> ProviderResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.attempts.lock().unwrap().push(tokio::time::Instant::now());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Permanent("script exhausted".to_string())))
        }
    }

    #[async_trait]
    impl RemoteProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        fn supports_vision(&self) -> bool {
            self.vision
        }

        async fn complete(&self, _prompt: &str) -> ProviderResult<String> {
            self.next().await
        }

        async fn complete_vision(
            &self,
            _prompt: &str,
            image_base64: &str,
            mime_type: &str,
        ) -> ProviderResult<String> {
            assert!(!image_base64.is_empty());
            assert!(mime_type.starts_with("image/"));
            self.next().await
        }
    }

    pub(crate) const GOOD_REPLY: &str =
        r#"{"folder_name": "Travel", "category": "document", "confidence": 0.9, "reason": "itinerary"}"#;

    fn classifier(provider: Arc<ScriptedProvider>) -> RemoteClassifier {
        RemoteClassifier::new(provider, &ProviderConfig::default(), &PromptConfig::default())
            .with_retry(3, Duration::from_millis(1))
    }

    fn request(content: &str) -> ClassificationRequest {
        ClassificationRequest::new("trip.txt", content)
    }

    #[test]
    fn test_parse_plain_json() {
        let v = parse_verdict(GOOD_REPLY).unwrap();
        assert_eq!(v.folder_name, "Travel");
        assert_eq!(v.confidence, 0.9);
        assert_eq!(v.reason, "itinerary");
    }

    #[test]
    fn test_parse_strips_fences() {
        let text = format!("```json\n{}\n```", GOOD_REPLY);
        assert_eq!(parse_verdict(&text).unwrap().folder_name, "Travel");

        let text = format!("```\n{}\n```  ", GOOD_REPLY);
        assert_eq!(parse_verdict(&text).unwrap().folder_name, "Travel");
    }

    #[test]
    fn test_parse_defaults_and_alias() {
        let v = parse_verdict(r#"{"folderName": "Taxes", "category": "document"}"#).unwrap();
        assert_eq!(v.folder_name, "Taxes");
        assert_eq!(v.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(v.reason, "");

        let v = parse_verdict(r#"{"folder_name": "Taxes", "category": "d", "confidence": 7}"#).unwrap();
        assert_eq!(v.confidence, 1.0);
    }

    #[test]
    fn test_parse_rejects_missing_required() {
        assert!(matches!(
            parse_verdict(r#"{"category": "document"}"#),
            Err(ProviderError::Parse(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"folder_name": "Taxes"}"#),
            Err(ProviderError::Parse(_))
        ));
        assert!(matches!(parse_verdict("Sure! Folder: Taxes"), Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_build_prompt_fills_and_caps() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let remote = classifier(provider);
        let content = "x".repeat(5000);
        let prompt = remote.build_prompt(&request(&content));

        assert!(prompt.contains("trip.txt"));
        assert!(prompt.contains("5000"));
        assert!(!prompt.contains("{content}"));
        assert!(!prompt.contains(&"x".repeat(2201)));
        assert!(prompt.contains(&"x".repeat(2200)));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Transient("429".to_string())),
            Err(ProviderError::Transient("connection reset".to_string())),
            Ok(GOOD_REPLY.to_string()),
        ]));
        let verdict = classifier(provider.clone()).classify(&request("plans")).await.unwrap();
        assert_eq!(verdict.folder_name, "Travel");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let base = Duration::from_millis(100);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Transient("503".to_string())),
            Err(ProviderError::Transient("503".to_string())),
            Err(ProviderError::Transient("503".to_string())),
            Ok(GOOD_REPLY.to_string()),
        ]));
        let remote = classifier(provider.clone()).with_retry(4, base);
        remote.classify(&request("plans")).await.unwrap();

        let times = provider.attempt_times();
        assert_eq!(times.len(), 4);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        for (gap, expected) in gaps.iter().zip([base, base * 2, base * 4]) {
            assert!(
                *gap >= expected && *gap < expected + Duration::from_millis(10),
                "gap {:?}, expected {:?}",
                gap,
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Transient("a".to_string())),
            Err(ProviderError::Transient("b".to_string())),
            Err(ProviderError::Transient("c".to_string())),
            Ok(GOOD_REPLY.to_string()),
        ]));
        let err = classifier(provider.clone()).classify(&request("plans")).await.unwrap_err();
        assert_eq!(err, ProviderError::Transient("c".to_string()));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Permanent("401".to_string())),
            Ok(GOOD_REPLY.to_string()),
        ]));
        let err = classifier(provider.clone()).classify(&request("plans")).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_parse_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("not json".to_string()),
            Ok(GOOD_REPLY.to_string()),
        ]));
        let err = classifier(provider.clone()).classify(&request("plans")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![Ok(GOOD_REPLY.to_string()), Ok(GOOD_REPLY.to_string())])
                .with_delay(Duration::from_millis(200)),
        );
        let remote = classifier(provider.clone())
            .with_retry(2, Duration::from_millis(1))
            .with_timeout(Duration::from_millis(20));
        let err = remote.classify(&request("plans")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_image_requires_vision() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(GOOD_REPLY.to_string())]));
        let err = classifier(provider.clone())
            .classify_image(&request(""), b"\x89PNG", "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
        assert_eq!(provider.calls(), 0);

        let provider = Arc::new(
            ScriptedProvider::new(vec![Ok(GOOD_REPLY.to_string())]).with_vision(),
        );
        let verdict = classifier(provider)
            .classify_image(&request(""), b"\x89PNG", "image/png")
            .await
            .unwrap();
        assert_eq!(verdict.folder_name, "Travel");
    }

    #[test]
    fn test_image_mime_type() {
        assert_eq!(image_mime_type("JPG"), Some("image/jpeg"));
        assert_eq!(image_mime_type(".png"), Some("image/png"));
        assert_eq!(image_mime_type("pdf"), None);
    }
}
