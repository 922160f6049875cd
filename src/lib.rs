// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! foldwise: watch a folder, classify arriving files, move them into place
//!
//! Classification is hierarchical: a content-hash cache, then deterministic
//! filename rules, then one remote model with retry, and finally a local
//! fallback that always yields a usable folder name. Every move is recorded
//! in an undo history.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extract;
pub mod history;
pub mod mover;
pub mod provider;
pub mod remote;
pub mod rules;
pub mod watcher;
pub mod worker;

pub use config::AppConfig;
pub use error::{FoldwiseError, ProviderError, Result};
