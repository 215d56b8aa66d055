// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Naming and placement of processed screenshots
//!
//! Files land in `base/<year>/<month name>/<category>/` as
//! `Screenshot_<YYYY>_<Mon>_<D>_<description>.<ext>`.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::classifier::Category;
use crate::{Result, SnapsortError};

/// Longest description kept in a generated filename
pub const MAX_DESCRIPTION_LENGTH: usize = 40;

/// Numeric suffixes tried before falling back to a hash suffix
pub const MAX_COLLISION_ATTEMPTS: u32 = 100;

/// Moves screenshots into the organized tree
#[derive(Debug, Clone)]
pub struct FileOrganizer {
    base_dir: PathBuf,
}

impl FileOrganizer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Rename and move `source` into the tree, returning the final path and filename.
    ///
    /// The source is left untouched when the move fails.
    pub fn organize(
        &self,
        source: &Path,
        category: Category,
        description: &str,
        timestamp: DateTime<Local>,
    ) -> Result<(PathBuf, String)> {
        if !source.exists() {
            return Err(SnapsortError::NotFound(source.to_path_buf()));
        }

        let target_dir = self.target_dir(category, &timestamp);
        let filename = generate_filename(source, description, &timestamp);
        let target = resolve_collision(&target_dir.join(filename), source);

        fs::create_dir_all(&target_dir)?;
        move_file(source, &target)?;

        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("Organized {:?} -> {:?}", source, target);
        Ok((target, name))
    }

    /// `base/<year>/<full month name>/<category>`
    pub fn target_dir(&self, category: Category, timestamp: &DateTime<Local>) -> PathBuf {
        self.base_dir
            .join(timestamp.format("%Y").to_string())
            .join(timestamp.format("%B").to_string())
            .join(category.as_str())
    }
}

/// Build `Screenshot_<YYYY>_<Mon>_<D>_<description>.<ext>` for `original`.
pub fn generate_filename(original: &Path, description: &str, timestamp: &DateTime<Local>) -> String {
    let description: String = description.chars().take(MAX_DESCRIPTION_LENGTH).collect();
    let date = timestamp.format("%Y_%b_%-d");
    match original.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => {
            format!("Screenshot_{}_{}.{}", date, description, ext.to_lowercase())
        }
        _ => format!("Screenshot_{}_{}", date, description),
    }
}

/// Pick a free path: `path` itself, then `_2`..`_101`, then a 6-char hash
/// suffix derived from `source`, re-salted until the name is unused.
pub fn resolve_collision(path: &Path, source: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for i in 2..MAX_COLLISION_ATTEMPTS + 2 {
        let candidate = parent.join(format!("{}_{}{}", stem, i, suffix));
        if !candidate.exists() {
            return candidate;
        }
    }

    let source_key = source.to_string_lossy();
    let mut salt: u64 = 0;
    loop {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source_key.as_bytes());
        if salt > 0 {
            hasher.update(&salt.to_le_bytes());
        }
        let hash = hasher.finalize().to_hex();
        let candidate = parent.join(format!("{}_{}{}", stem, &hash.as_str()[..6], suffix));
        if !candidate.exists() {
            warn!("Exhausted numeric suffixes for {:?}, using {:?}", path, candidate);
            return candidate;
        }
        salt += 1;
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(source: &Path, target: &Path) -> Result<()> {
    let rename_err = match fs::rename(source, target) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!("rename failed ({}), trying copy for {:?}", rename_err, source);

    if let Err(e) = fs::copy(source, target) {
        let _ = fs::remove_file(target);
        warn!("Failed to move {:?} to {:?}: {}", source, target, e);
        return Err(rename_err.into());
    }
    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(target);
        return Err(e.into());
    }
    Ok(())
}
