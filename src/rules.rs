// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Deterministic filename rules
//!
//! Keyword rules are checked before extension rules; the first match in
//! each class wins. No rule ever touches the network or fails. Rules whose
//! folder would not pass folder-name validation are dropped at construction.

use tracing::warn;

use crate::classifier::{validate_folder_name, ClassificationResult};
use crate::config::{ExtensionRule, KeywordRule, RuleConfig};

pub const KEYWORD_CONFIDENCE: f64 = 1.0;
pub const EXTENSION_CONFIDENCE: f64 = 0.95;

/// Zero-latency folder resolution from filename keywords and extension
#[derive(Debug, Clone)]
pub struct RuleEngine {
    keywords: Vec<KeywordRule>,
    extensions: Vec<ExtensionRule>,
}

impl RuleEngine {
    pub fn new(config: &RuleConfig) -> Self {
        // Normalize once so `check` only lowercases its inputs
        let keywords = config
            .keywords
            .iter()
            .filter_map(|rule| {
                Some(KeywordRule {
                    keywords: rule
                        .keywords
                        .iter()
                        .map(|k| k.trim().to_lowercase())
                        .filter(|k| !k.is_empty())
                        .collect(),
                    folder: usable_folder(&rule.folder)?,
                    category: rule.category.clone(),
                })
            })
            .collect();

        let extensions = config
            .extensions
            .iter()
            .filter_map(|rule| {
                Some(ExtensionRule {
                    extensions: rule.extensions.iter().map(|e| normalize_extension(e)).collect(),
                    folder: usable_folder(&rule.folder)?,
                    category: rule.category.clone(),
                })
            })
            .collect();

        Self { keywords, extensions }
    }

    /// An engine with no rules at all
    pub fn empty() -> Self {
        Self {
            keywords: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// Resolve a folder for `filename`, or `None` to fall through to the
    /// cache and remote classifier.
    pub fn check(&self, filename: &str, extension: &str) -> Option<ClassificationResult> {
        let name = filename.to_lowercase();

        for rule in &self.keywords {
            if let Some(keyword) = rule.keywords.iter().find(|k| name.contains(k.as_str())) {
                tracing::debug!("Keyword rule '{}' matched {}", keyword, filename);
                return Some(ClassificationResult::success(
                    &rule.folder,
                    &rule.category,
                    KEYWORD_CONFIDENCE,
                    format!("keyword rule: '{}'", keyword),
                ));
            }
        }

        let ext = normalize_extension(extension);
        if ext.is_empty() {
            return None;
        }

        self.extensions
            .iter()
            .find(|rule| rule.extensions.iter().any(|e| *e == ext))
            .map(|rule| {
                tracing::debug!("Extension rule '.{}' matched {}", ext, filename);
                ClassificationResult::success(
                    &rule.folder,
                    &rule.category,
                    EXTENSION_CONFIDENCE,
                    format!("extension rule: '.{}'", ext),
                )
            })
    }

    pub fn len(&self) -> usize {
        self.keywords.len() + self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn usable_folder(folder: &str) -> Option<String> {
    let validated = validate_folder_name(folder);
    if validated.is_none() {
        warn!("Ignoring rule with unusable folder {:?}", folder);
    }
    validated
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}
