// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Text extraction for classification
//!
//! Format-specific parsing (PDF, office documents, OCR) plugs in through the
//! [`Extractor`] trait. Extraction never fails a file: problems are reported
//! in [`Extraction::error`] and classification proceeds on whatever text is
//! available.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Characters kept from the start and from the end of long documents
pub const HEAD_CHARS: usize = 1000;
pub const TAIL_CHARS: usize = 1000;

const OMISSION_MARKER: &str = "\n\n[... omitted ...]\n\n";
const MAX_FULL_READ_BYTES: u64 = 1024 * 1024;
const WINDOW_BYTES: usize = 64 * 1024;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "xml", "yaml", "yml", "toml", "ini", "log",
    "html", "htm", "rtf", "py", "js", "ts", "rs", "go", "java", "c", "cpp", "h", "css", "sh",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub content: String,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
}

/// Best-effort text summary of a file
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Extraction;
}

/// Reads text-like files directly; other formats yield metadata only
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn handles(extension: &str) -> bool {
        TEXT_EXTENSIONS.contains(&extension.to_lowercase().as_str())
    }

    fn read_text(path: &Path, size: u64) -> io::Result<String> {
        if size <= MAX_FULL_READ_BYTES {
            let bytes = std::fs::read(path)?;
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }

        // Huge file: only the ends survive truncation anyway
        let mut file = File::open(path)?;
        let mut head = vec![0u8; WINDOW_BYTES];
        file.read_exact(&mut head)?;
        let mut tail = vec![0u8; WINDOW_BYTES];
        file.seek(SeekFrom::End(-(WINDOW_BYTES as i64)))?;
        file.read_exact(&mut tail)?;

        Ok(format!(
            "{}{}{}",
            String::from_utf8_lossy(&head),
            OMISSION_MARKER,
            String::from_utf8_lossy(&tail)
        ))
    }
}

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Extraction {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                return Extraction {
                    content: String::new(),
                    metadata: json!({ "extension": extension }),
                    error: Some(e.to_string()),
                }
            }
        };

        if !Self::handles(&extension) {
            return Extraction {
                content: String::new(),
                metadata: json!({ "extension": extension, "size_bytes": size }),
                error: None,
            };
        }

        match Self::read_text(path, size) {
            Ok(text) => {
                let char_count = text.chars().count();
                let content = smart_truncate(&text);
                debug!("Extracted {} chars from {:?}", char_count, path);
                Extraction {
                    metadata: json!({
                        "extension": extension,
                        "size_bytes": size,
                        "char_count": char_count,
                        "truncated": content.chars().count() < char_count,
                    }),
                    content,
                    error: None,
                }
            }
            Err(e) => Extraction {
                content: String::new(),
                metadata: json!({ "extension": extension, "size_bytes": size }),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Keep the beginning and end of long text, where titles and totals live
pub fn smart_truncate(text: &str) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= HEAD_CHARS + TAIL_CHARS {
        return text.to_string();
    }

    let head: String = text.chars().take(HEAD_CHARS).collect();
    let tail: String = text.chars().skip(count - TAIL_CHARS).collect();
    format!("{}{}{}", head, OMISSION_MARKER, tail)
}
