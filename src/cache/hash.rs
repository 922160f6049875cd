// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Content hashing for cache keys
//!
//! Small files are hashed in full. Files above the limit are hashed over a
//! head/middle/tail sample plus their length. Two different large files with
//! identical samples and length therefore share a key; that collision is
//! accepted to keep hashing cost bounded. Set `full_hash_limit_bytes` to
//! `u64::MAX` to always hash in full.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::config::CacheConfig;

const BLOCK_SIZE: usize = 64 * 1024;

/// Prefix marking a sampled (weak) digest
pub const SAMPLED_PREFIX: &str = "s-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashStrategy {
    pub full_hash_limit_bytes: u64,
    pub sample_bytes: u64,
}

impl Default for HashStrategy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for HashStrategy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            full_hash_limit_bytes: config.full_hash_limit_bytes,
            sample_bytes: config.sample_bytes.max(1),
        }
    }
}

/// Compute the cache key for the file at `path`
pub fn content_hash(path: &Path, strategy: &HashStrategy) -> io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    if size <= strategy.full_hash_limit_bytes {
        full_hash(&mut file)
    } else {
        sampled_hash(&mut file, size, strategy.sample_bytes)
    }
}

fn full_hash(file: &mut File) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn sampled_hash(file: &mut File, size: u64, sample: u64) -> io::Result<String> {
    let sample = sample.min(size);
    let middle = (size / 2).saturating_sub(sample / 2);
    let tail = size - sample;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; sample as usize];
    for offset in [0, middle, tail] {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        hasher.update(&buf);
    }
    hasher.update(&size.to_le_bytes());

    Ok(format!("{}{}", SAMPLED_PREFIX, hasher.finalize().to_hex()))
}
