// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Hierarchical classification: cache, rules, remote model, fallback
//!
//! [`Classifier::classify`] never fails. Whatever happens with the remote
//! provider, the caller receives a successful result carrying a valid
//! folder name so the file can still be moved.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cache::{content_hash_async, CacheEntry, HashStrategy, ResultCache};
use crate::error::ProviderError;
use crate::remote::{image_mime_type, ModelVerdict, RemoteClassifier};
use crate::rules::RuleEngine;

/// Characters never allowed in a classified folder name
pub const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Folder names that would collide with well-known system locations
pub const RESERVED_NAMES: &[&str] = &[
    "documents", "desktop", "downloads", "pictures", "music", "videos", "con", "prn", "aux",
    "nul", "com1", "lpt1",
];

pub const MIN_FOLDER_NAME_CHARS: usize = 2;
pub const MAX_FOLDER_NAME_CHARS: usize = 30;
pub const FALLBACK_STEM_CHARS: usize = 20;
pub const FALLBACK_CONFIDENCE: f64 = 0.5;
pub const CACHE_HIT_CONFIDENCE: f64 = 1.0;

/// What the classifier is asked about a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRequest {
    pub filename: String,
    pub extension: String,
    /// Already truncated text summary
    pub content: String,
    pub source_path: Option<PathBuf>,
}

impl ClassificationRequest {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let filename = filename.into();
        let extension = extension_of(&filename);
        Self {
            filename,
            extension,
            content: content.into(),
            source_path: None,
        }
    }

    /// Build a request for a file on disk
    pub fn for_path(path: &Path, content: impl Into<String>) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(filename, content).with_source(path)
    }

    /// Attach the file so its content hash can key the cache
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationStatus {
    Success,
    Error,
}

/// Outcome of classifying one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub status: ClassificationStatus,
    pub folder_name: String,
    pub category: String,
    pub confidence: f64,
    pub reason: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassificationResult {
    pub fn success(folder_name: &str, category: &str, confidence: f64, reason: String) -> Self {
        Self {
            status: ClassificationStatus::Success,
            folder_name: folder_name.to_string(),
            category: category.to_string(),
            confidence,
            reason,
            cached: false,
            error: None,
        }
    }

    fn from_cache(entry: CacheEntry) -> Self {
        Self {
            status: ClassificationStatus::Success,
            folder_name: entry.folder_name,
            category: entry.category,
            confidence: CACHE_HIT_CONFIDENCE,
            reason: entry.reason,
            cached: true,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ClassificationStatus::Success
    }
}

/// Orchestrates the cache, rule engine and remote classifier
pub struct Classifier {
    rules: RuleEngine,
    cache: Option<ResultCache>,
    remote: RemoteClassifier,
    hash_strategy: HashStrategy,
}

impl Classifier {
    pub fn new(
        rules: RuleEngine,
        cache: Option<ResultCache>,
        remote: RemoteClassifier,
        hash_strategy: HashStrategy,
    ) -> Self {
        Self {
            rules,
            cache,
            remote,
            hash_strategy,
        }
    }

    pub fn remote(&self) -> &RemoteClassifier {
        &self.remote
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    /// Classify a file; always returns a usable folder name
    pub async fn classify(&self, request: &ClassificationRequest) -> ClassificationResult {
        let content_hash = self.lookup_hash(request).await;

        if let (Some(cache), Some(hash)) = (&self.cache, &content_hash) {
            match cache.lookup_async(hash.clone()).await {
                Ok(Some(entry)) => match validate_folder_name(&entry.folder_name) {
                    Some(folder) => {
                        debug!("Cache hit for {} -> {}", request.filename, folder);
                        return ClassificationResult {
                            folder_name: folder,
                            ..ClassificationResult::from_cache(entry)
                        };
                    }
                    None => warn!("Ignoring invalid cached folder {:?}", entry.folder_name),
                },
                Ok(None) => {}
                Err(e) => warn!("Cache lookup failed for {}: {}", request.filename, e),
            }
        }

        if let Some(result) = self.rules.check(&request.filename, &request.extension) {
            return result;
        }

        match self.ask_remote(request).await {
            Ok(verdict) => match validate_folder_name(&verdict.folder_name) {
                Some(folder) => {
                    info!("Remote classified {} -> {}", request.filename, folder);
                    if let Some(hash) = content_hash {
                        self.remember(request, hash, &folder, &verdict).await;
                    }
                    ClassificationResult::success(
                        &folder,
                        &verdict.category,
                        verdict.confidence,
                        verdict.reason,
                    )
                }
                None => {
                    debug!("Rejected model folder {:?} for {}", verdict.folder_name, request.filename);
                    fallback_result(request, &format!("invalid folder name {:?}", verdict.folder_name))
                }
            },
            Err(e) => {
                warn!("Remote classification failed for {}: {}", request.filename, e);
                fallback_result(request, &e.to_string())
            }
        }
    }

    async fn lookup_hash(&self, request: &ClassificationRequest) -> Option<String> {
        self.cache.as_ref()?;
        let path = request.source_path.clone()?;
        match content_hash_async(path, self.hash_strategy).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                debug!("Could not hash {}: {}", request.filename, e);
                None
            }
        }
    }

    async fn ask_remote(&self, request: &ClassificationRequest) -> Result<ModelVerdict, ProviderError> {
        if let (Some(mime), Some(path)) = (image_mime_type(&request.extension), &request.source_path) {
            if self.remote.supports_vision() {
                match tokio::fs::read(path).await {
                    Ok(bytes) => return self.remote.classify_image(request, &bytes, mime).await,
                    Err(e) => debug!("Could not read image {}: {}, using text", request.filename, e),
                }
            }
        }
        self.remote.classify(request).await
    }

    async fn remember(
        &self,
        request: &ClassificationRequest,
        hash: String,
        folder: &str,
        verdict: &ModelVerdict,
    ) {
        let Some(cache) = &self.cache else { return };

        let file_size_bytes = match &request.source_path {
            Some(path) => tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0),
            None => 0,
        };
        let entry = CacheEntry {
            content_hash: hash,
            filename: request.filename.clone(),
            file_size_bytes,
            folder_name: folder.to_string(),
            category: verdict.category.clone(),
            reason: verdict.reason.clone(),
            timestamp: Utc::now(),
        };
        if let Err(e) = cache.store_async(entry).await {
            warn!("Failed to cache result for {}: {}", request.filename, e);
        }
    }
}

/// Accept a candidate folder name, or `None` if it is unusable
pub fn validate_folder_name(candidate: &str) -> Option<String> {
    let cleaned: String = candidate.chars().filter(|c| !FORBIDDEN_CHARS.contains(c)).collect();
    let cleaned = cleaned.trim();

    let len = cleaned.chars().count();
    if !(MIN_FOLDER_NAME_CHARS..=MAX_FOLDER_NAME_CHARS).contains(&len) {
        return None;
    }
    if cleaned.chars().any(char::is_control) {
        return None;
    }
    let lower = cleaned.to_lowercase();
    if RESERVED_NAMES.contains(&lower.as_str()) {
        return None;
    }
    Some(cleaned.to_string())
}

/// Deterministic folder for a file the remote classifier could not place
pub fn fallback_folder_name(filename: &str, extension: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem: String = stem
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c) && !c.is_control())
        .collect();
    let stem: String = stem.trim().chars().take(FALLBACK_STEM_CHARS).collect();

    validate_folder_name(&stem).unwrap_or_else(|| extension_category(extension).to_string())
}

fn fallback_result(request: &ClassificationRequest, error: &str) -> ClassificationResult {
    let folder = fallback_folder_name(&request.filename, &request.extension);
    ClassificationResult {
        error: Some(error.to_string()),
        ..ClassificationResult::success(
            &folder,
            "other",
            FALLBACK_CONFIDENCE,
            format!("fallback (error: {})", error),
        )
    }
}

fn extension_category(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_lowercase().as_str() {
        "txt" | "pdf" | "doc" | "docx" | "md" | "rtf" | "hwp" => "Docs",
        "xlsx" | "xls" => "Spreadsheets",
        "csv" | "json" | "xml" => "Data",
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "heic" => "Images",
        "mp4" | "avi" | "mov" | "mkv" | "webm" => "Video",
        "mp3" | "wav" | "flac" | "m4a" | "ogg" => "Audio",
        _ => "Other",
    }
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PromptConfig, ProviderConfig, RuleConfig};
    use crate::remote::tests::{ScriptedProvider, GOOD_REPLY};
    use std::sync::Arc;
    use std::time::Duration;

    fn classifier(provider: Arc<ScriptedProvider>, cache: Option<ResultCache>) -> Classifier {
        let remote =
            RemoteClassifier::new(provider, &ProviderConfig::default(), &PromptConfig::default())
                .with_retry(3, Duration::from_millis(1));
        Classifier::new(
            RuleEngine::new(&RuleConfig::default()),
            cache,
            remote,
            HashStrategy::default(),
        )
    }

    fn assert_valid(folder: &str) {
        let len = folder.chars().count();
        assert!((2..=30).contains(&len), "bad length: {:?}", folder);
        assert!(!folder.contains(FORBIDDEN_CHARS), "forbidden char: {:?}", folder);
        assert!(!RESERVED_NAMES.contains(&folder.to_lowercase().as_str()));
    }

    #[tokio::test]
    async fn test_rule_match_skips_provider() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(GOOD_REPLY.to_string())]));
        let c = classifier(provider.clone(), Some(ResultCache::in_memory().unwrap()));

        for name in ["invoice_2024.pdf", "INVOICE.png", "receipt.xyz"] {
            let result = c.classify(&ClassificationRequest::new(name, "")).await;
            assert_eq!(result.folder_name, "Receipts");
            assert!(!result.cached);
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_reserved_rule_folder_is_never_returned() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(GOOD_REPLY.to_string())]));
        let rules = RuleConfig {
            keywords: vec![crate::config::KeywordRule {
                keywords: vec!["tax".to_string()],
                folder: "Documents".to_string(),
                category: "document".to_string(),
            }],
            extensions: Vec::new(),
        };
        let remote = RemoteClassifier::new(
            provider.clone(),
            &ProviderConfig::default(),
            &PromptConfig::default(),
        );
        let classifier = Classifier::new(RuleEngine::new(&rules), None, remote, HashStrategy::default());

        let result = classifier
            .classify(&ClassificationRequest::new("tax_2024.pdf", "annual return"))
            .await;
        assert_valid(&result.folder_name);
        assert_eq!(result.folder_name, "Travel");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_rule_results_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");
        std::fs::write(&path, b"pdf bytes").unwrap();

        let cache = ResultCache::in_memory().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let c = classifier(provider, Some(cache.clone()));
        c.classify(&ClassificationRequest::for_path(&path, "")).await;

        assert_eq!(cache.stats().unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_same_content_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("trip_plan.txt");
        let second = dir.path().join("copy of plan.txt");
        std::fs::write(&first, b"Flight to Lisbon on May 3").unwrap();
        std::fs::write(&second, b"Flight to Lisbon on May 3").unwrap();

        let provider = Arc::new(ScriptedProvider::new(vec![Ok(GOOD_REPLY.to_string())]));
        let c = classifier(provider.clone(), Some(ResultCache::in_memory().unwrap()));

        let a = c.classify(&ClassificationRequest::for_path(&first, "Flight")).await;
        assert_eq!(a.folder_name, "Travel");
        assert!(!a.cached);

        let b = c.classify(&ClassificationRequest::for_path(&second, "Flight")).await;
        assert_eq!(b.folder_name, "Travel");
        assert!(b.cached);
        assert_eq!(b.confidence, CACHE_HIT_CONFIDENCE);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Permanent(
            "401 unauthorized".to_string(),
        ))]));
        let c = classifier(provider, None);

        let result = c.classify(&ClassificationRequest::new("quarterly plan.txt", "")).await;
        assert_eq!(result.status, ClassificationStatus::Success);
        assert_eq!(result.folder_name, "quarterly plan");
        assert_eq!(result.confidence, FALLBACK_CONFIDENCE);
        assert!(result.reason.contains("401 unauthorized"));
    }

    #[tokio::test]
    async fn test_invalid_model_folder_falls_back() {
        let replies = vec![
            Ok(r#"{"folder_name": "Documents", "category": "document"}"#.to_string()),
            Ok(r#"{"folder_name": "x", "category": "document"}"#.to_string()),
            Ok(r#"{"folder_name": "a/b:c", "category": "document"}"#.to_string()),
        ];
        let provider = Arc::new(ScriptedProvider::new(replies));
        let c = classifier(provider, None);

        let r = c.classify(&ClassificationRequest::new("a.pdf", "")).await;
        assert_eq!(r.folder_name, "Docs");
        let r = c.classify(&ClassificationRequest::new("zz.csv", "")).await;
        assert_eq!(r.folder_name, "zz");
        // Forbidden characters are stripped, the rest is accepted
        let r = c.classify(&ClassificationRequest::new("q.dat", "")).await;
        assert_eq!(r.folder_name, "abc");
        assert_eq!(r.confidence, crate::remote::DEFAULT_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_always_success_and_valid() {
        let names = [
            "x.bin",
            ".hidden",
            "con.txt",
            "desktop.jpg",
            "a?.mp3",
            "<<<>>>.mov",
            "a_really_long_filename_that_goes_on_forever.docx",
            "",
            "日本語のファイル.xlsx",
        ];
        for name in names {
            let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Transient(
                "offline".to_string(),
            )); 3]));
            let c = Classifier::new(
                RuleEngine::empty(),
                None,
                RemoteClassifier::new(provider, &ProviderConfig::default(), &PromptConfig::default())
                    .with_retry(3, Duration::from_millis(1)),
                HashStrategy::default(),
            );
            let result = c.classify(&ClassificationRequest::new(name, "")).await;
            assert!(result.is_success(), "{}", name);
            assert_valid(&result.folder_name);
        }
    }

    #[tokio::test]
    async fn test_vision_used_for_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_0001.png");
        std::fs::write(&path, b"\x89PNG\r\n").unwrap();

        let provider = Arc::new(
            ScriptedProvider::new(vec![Ok(GOOD_REPLY.to_string())]).with_vision(),
        );
        let c = Classifier::new(
            RuleEngine::empty(),
            None,
            RemoteClassifier::new(provider.clone(), &ProviderConfig::default(), &PromptConfig::default()),
            HashStrategy::default(),
        );
        let result = c.classify(&ClassificationRequest::for_path(&path, "")).await;
        assert_eq!(result.folder_name, "Travel");
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn test_validate_folder_name() {
        assert_eq!(validate_folder_name("  Travel "), Some("Travel".to_string()));
        assert_eq!(validate_folder_name("Tax*es"), Some("Taxes".to_string()));
        assert_eq!(validate_folder_name("회의록"), Some("회의록".to_string()));
        assert_eq!(validate_folder_name("a"), None);
        assert_eq!(validate_folder_name("DeskTop"), None);
        assert_eq!(validate_folder_name("nul"), None);
        assert_eq!(validate_folder_name(&"x".repeat(31)), None);
        assert!(validate_folder_name(&"x".repeat(30)).is_some());
    }

    #[test]
    fn test_fallback_folder_name() {
        assert_eq!(fallback_folder_name("budget.xlsx", "xlsx"), "budget");
        assert_eq!(fallback_folder_name("a.xlsx", "xlsx"), "Spreadsheets");
        assert_eq!(fallback_folder_name("?.csv", "csv"), "Data");
        assert_eq!(fallback_folder_name("pictures.jpg", "jpg"), "Images");
        assert_eq!(fallback_folder_name("x.zzz", "zzz"), "Other");
        assert_eq!(
            fallback_folder_name("abcdefghijklmnopqrstuvwxyz.txt", "txt"),
            "abcdefghijklmnopqrst"
        );
    }

    #[test]
    fn test_request_extension() {
        let r = ClassificationRequest::new("Report.Final.PDF", "");
        assert_eq!(r.extension, "pdf");
        assert_eq!(ClassificationRequest::new("Makefile", "").extension, "");
    }
}
