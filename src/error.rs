// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Snapsort

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Snapsort operations
pub type Result<T> = std::result::Result<T, SnapsortError>;

/// Snapsort error types
#[derive(Error, Debug)]
pub enum SnapsortError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Inference unavailable: {0}")]
    Inference(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store connection is closed")]
    StoreClosed,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Extraction error: {0}")]
    Extraction(String),
}
