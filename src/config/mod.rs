// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for foldwise
//!
//! One `AppConfig` value is loaded before any component is built and handed
//! to each constructor. Changing settings means building fresh components.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::validate_folder_name;
use crate::{FoldwiseError, Result};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Directories to watch
    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<String>,

    /// Root under which category folders are created
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Remote classifier settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Prompt templates
    #[serde(default)]
    pub prompts: PromptConfig,

    /// Deterministic filename rules
    #[serde(default)]
    pub rules: RuleConfig,

    /// File mover settings
    #[serde(default)]
    pub mover: MoverConfig,

    /// Queue worker settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Classification cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Undo history settings
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Which remote provider backs the classifier
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(alias = "open_ai")]
    OpenAi,
    Claude,
    Gemini,
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OpenAi => "openai",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Credential; falls back to the provider's environment variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Endpoint override; each provider has its own default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Total attempts per call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptConfig {
    /// Text classification template. Placeholders: {filename}, {file_type},
    /// {content_length}, {content}
    #[serde(default = "default_classification_prompt")]
    pub classification: String,
    /// Image classification template. Placeholders: {filename}, {file_type}
    #[serde(default = "default_vision_prompt")]
    pub vision: String,
    /// Maximum number of content characters embedded in a prompt
    #[serde(default = "default_content_limit")]
    pub content_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    pub folder: String,
    pub category: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExtensionRule {
    pub extensions: Vec<String>,
    pub folder: String,
    pub category: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuleConfig {
    #[serde(default = "default_keyword_rules")]
    pub keywords: Vec<KeywordRule>,
    #[serde(default = "default_extension_rules")]
    pub extensions: Vec<ExtensionRule>,
}

/// What to do when the destination file already exists
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStrategy {
    Skip,
    Overwrite,
    #[default]
    RenameWithNumber,
    RenameWithTimestamp,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MoverConfig {
    #[serde(default)]
    pub duplicate_strategy: DuplicateStrategy,
    #[serde(default = "default_max_folder_name_length")]
    pub max_folder_name_length: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    /// Permit pool size: simultaneous per-file pipelines
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Bounded dequeue wait between shutdown checks
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    /// How long to wait for a newly created file to stop growing
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_path")]
    pub path: String,
    /// Files up to this size are hashed in full; larger files are sampled
    #[serde(default = "default_full_hash_limit")]
    pub full_hash_limit_bytes: u64,
    /// Size of each head/middle/tail sample for large files
    #[serde(default = "default_sample_bytes")]
    pub sample_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: String,
}

// Default value functions
fn default_watch_paths() -> Vec<String> { vec!["./watch".to_string()] }
fn default_base_path() -> String { "./sorted".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 500 }
fn default_timeout() -> u64 { 30 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 1000 }
fn default_content_limit() -> usize { 2200 }
fn default_max_folder_name_length() -> usize { 255 }
fn default_max_concurrent() -> usize { 20 }
fn default_queue_capacity() -> usize { 1024 }
fn default_dequeue_timeout_ms() -> u64 { 1000 }
fn default_settle_secs() -> u64 { 10 }
fn default_true() -> bool { true }
fn default_cache_path() -> String { "foldwise_cache.db".to_string() }
fn default_full_hash_limit() -> u64 { 10 * 1024 * 1024 }
fn default_sample_bytes() -> u64 { 64 * 1024 }
fn default_history_path() -> String { "foldwise_history.json".to_string() }

fn default_classification_prompt() -> String {
    r#"You are a file organization expert. Analyze the file below and recommend the most suitable folder name for keeping it.

File information:
- Filename: {filename}
- File type: {file_type}
- Content length: {content_length}

File content (excerpt):
{content}

Rules for the folder name:
1. A short, meaningful name (for example "Invoices", "Travel Photos", "Meeting Notes")
2. Prefer 1-3 words
3. Reflect what the file is about, not its extension
4. Never use system folders such as Documents, Desktop or Downloads

Respond with JSON only, in exactly this shape:
{
    "folder_name": "recommended folder",
    "category": "document|image|video|audio|other",
    "confidence": 0.85,
    "reason": "why this folder fits"
}"#
    .to_string()
}

fn default_vision_prompt() -> String {
    r#"You are an image analysis expert. Look at the attached image and recommend the most suitable folder name for keeping it.

File information:
- Filename: {filename}
- File type: {file_type}

Rules for the folder name:
1. A short, meaningful name (for example "Travel Photos", "Screenshots", "Receipts")
2. Prefer 1-3 words
3. Reflect what the image shows and what it is for
4. Never use system folders such as Pictures or Desktop

Respond with JSON only, in exactly this shape:
{
    "folder_name": "recommended folder",
    "category": "image",
    "confidence": 0.85,
    "reason": "why this folder fits"
}"#
    .to_string()
}

fn keyword_rule(keywords: &[&str], folder: &str, category: &str) -> KeywordRule {
    KeywordRule {
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        folder: folder.to_string(),
        category: category.to_string(),
    }
}

fn extension_rule(extensions: &[&str], folder: &str, category: &str) -> ExtensionRule {
    ExtensionRule {
        extensions: extensions.iter().map(|s| s.to_string()).collect(),
        folder: folder.to_string(),
        category: category.to_string(),
    }
}

fn default_keyword_rules() -> Vec<KeywordRule> {
    vec![
        keyword_rule(&["invoice", "receipt", "영수증", "청구서"], "Receipts", "document"),
        keyword_rule(&["report", "보고서"], "Reports", "document"),
        keyword_rule(&["meeting", "minutes", "회의록"], "Meeting Notes", "document"),
        keyword_rule(&["contract", "계약서"], "Contracts", "document"),
        keyword_rule(&["screenshot", "스크린샷"], "Screenshots", "image"),
    ]
}

fn default_extension_rules() -> Vec<ExtensionRule> {
    vec![
        extension_rule(&["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "heic"], "Images", "image"),
        extension_rule(&["mp3", "wav", "flac", "aac", "m4a", "ogg"], "Audio", "audio"),
        extension_rule(&["mp4", "avi", "mov", "mkv", "flv", "webm"], "Video", "video"),
        extension_rule(&["zip", "rar", "7z", "tar", "gz"], "Archives", "archive"),
        extension_rule(
            &["py", "js", "ts", "java", "c", "cpp", "h", "rs", "go", "html", "css"],
            "Code",
            "code",
        ),
    ]
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            api_key: None,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            classification: default_classification_prompt(),
            vision: default_vision_prompt(),
            content_limit: default_content_limit(),
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            keywords: default_keyword_rules(),
            extensions: default_extension_rules(),
        }
    }
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            duplicate_strategy: DuplicateStrategy::default(),
            max_folder_name_length: default_max_folder_name_length(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            settle_secs: default_settle_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
            full_hash_limit_bytes: default_full_hash_limit(),
            sample_bytes: default_sample_bytes(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_paths: default_watch_paths(),
            base_path: default_base_path(),
            provider: ProviderConfig::default(),
            prompts: PromptConfig::default(),
            rules: RuleConfig::default(),
            mover: MoverConfig::default(),
            worker: WorkerConfig::default(),
            cache: CacheConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl ProviderConfig {
    /// Environment variable consulted when no key is configured
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self.kind {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Claude => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    /// Configured key, else the provider's environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.api_key_env()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.trim().is_empty())
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| FoldwiseError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges and rule folder names
    pub fn validate(&self) -> Result<()> {
        let p = &self.provider;
        if !(0.0..=2.0).contains(&p.temperature) {
            return Err(FoldwiseError::Config(
                "provider.temperature must be between 0 and 2".to_string(),
            ));
        }
        if p.max_attempts == 0 {
            return Err(FoldwiseError::Config(
                "provider.max_attempts must be at least 1".to_string(),
            ));
        }
        if p.model.trim().is_empty() {
            return Err(FoldwiseError::Config("provider.model is empty".to_string()));
        }
        if self.worker.max_concurrent == 0 {
            return Err(FoldwiseError::Config(
                "worker.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.worker.queue_capacity == 0 {
            return Err(FoldwiseError::Config(
                "worker.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.mover.max_folder_name_length == 0 {
            return Err(FoldwiseError::Config(
                "mover.max_folder_name_length must be at least 1".to_string(),
            ));
        }

        let rule_folders = self
            .rules
            .keywords
            .iter()
            .map(|r| &r.folder)
            .chain(self.rules.extensions.iter().map(|r| &r.folder));
        for folder in rule_folders {
            match validate_folder_name(folder) {
                Some(valid) if &valid == folder => {}
                _ => {
                    return Err(FoldwiseError::Config(format!(
                        "rule folder {:?} is not a valid folder name",
                        folder
                    )))
                }
            }
        }

        Ok(())
    }

    pub fn base_path(&self) -> PathBuf {
        PathBuf::from(&self.base_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.max_concurrent, 20);
        assert_eq!(config.provider.max_attempts, 3);
        assert_eq!(config.cache.full_hash_limit_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "base_path": "/tmp/out",
            "provider": { "kind": "ollama", "model": "llama3.2:3b" },
            "mover": { "duplicate_strategy": "skip" }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.base_path, "/tmp/out");
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
        assert_eq!(config.provider.timeout_secs, 30);
        assert_eq!(config.mover.duplicate_strategy, DuplicateStrategy::Skip);
        assert!(!config.rules.keywords.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.worker.max_concurrent = 4;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.worker.max_concurrent, 4);
        assert_eq!(loaded.rules.keywords, config.rules.keywords);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.history.path, "foldwise_history.json");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.provider.temperature = 3.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.worker.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rules.keywords.push(KeywordRule {
            keywords: vec!["tax".to_string()],
            folder: "Desktop".to_string(),
            category: "document".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let provider = ProviderConfig {
            api_key: Some("sk-test".to_string()),
            ..ProviderConfig::default()
        };
        assert_eq!(provider.resolve_api_key().as_deref(), Some("sk-test"));

        let ollama = ProviderConfig {
            kind: ProviderKind::Ollama,
            ..ProviderConfig::default()
        };
        assert_eq!(ollama.api_key_env(), None);
        assert_eq!(ollama.resolve_api_key(), None);
    }
}
