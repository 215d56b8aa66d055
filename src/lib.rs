// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Snapsort: screenshot ingestion and organization
//!
//! Watches screenshot folders, reads the text in each image, classifies it,
//! files it under `<year>/<month>/<category>` and indexes it for full-text
//! search with perceptual duplicate detection.

pub mod classifier;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod extractor;
pub mod gemini;
pub mod organizer;
pub mod pipeline;
pub mod watcher;
pub mod web;

pub use config::AppConfig;
pub use error::{Result, SnapsortError};
