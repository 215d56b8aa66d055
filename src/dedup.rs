// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Perceptual near-duplicate detection
//!
//! Every check is a linear scan over the stored hashes.

use image_hasher::{HashAlg, HasherConfig, ImageHash};
use std::path::Path;
use tracing::debug;

use crate::db::ScreenshotStore;
use crate::Result;

/// Default maximum Hamming distance for a duplicate
pub const DEFAULT_THRESHOLD: u32 = 5;

pub struct DuplicateDetector {
    store: ScreenshotStore,
    threshold: u32,
}

impl DuplicateDetector {
    pub fn new(store: ScreenshotStore, threshold: u32) -> Self {
        Self { store, threshold }
    }

    pub fn calculate_hash(&self, path: &Path) -> Result<String> {
        perceptual_hash(path)
    }

    /// Hash `path` and compare it against every stored hash.
    pub fn check_duplicate(&self, path: &Path) -> Result<(bool, Option<i64>)> {
        let hash = self.calculate_hash(path)?;
        let found = self.find_match(&hash)?;
        Ok((found.is_some(), found))
    }

    /// First stored screenshot (in insertion order) within the threshold of `hash`
    pub fn find_match(&self, hash: &str) -> Result<Option<i64>> {
        for entry in self.store.all_hashes()? {
            let distance = hamming_distance(hash, &entry.perceptual_hash);
            if distance <= self.threshold {
                debug!("Hash matches screenshot {} at distance {}", entry.screenshot_id, distance);
                return Ok(Some(entry.screenshot_id));
            }
        }
        Ok(None)
    }

    /// Append a hash entry; existing entries are never touched
    pub fn store_hash(&self, screenshot_id: i64, hash: &str, duplicate_of: Option<i64>) -> Result<()> {
        self.store.insert_hash(screenshot_id, hash, duplicate_of)
    }
}

/// 64-bit gradient hash of the image's pixels, base64 encoded.
///
/// Decodes the whole image; async callers run it on a blocking thread.
pub fn perceptual_hash(path: &Path) -> Result<String> {
    let image = image::open(path)?;
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(8, 8)
        .to_hasher();
    Ok(hasher.hash_image(&image).to_base64())
}

/// Differing bits between two encoded hashes; `u32::MAX` if either is invalid
/// or they have different lengths.
pub fn hamming_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    if h1.as_bytes().len() != h2.as_bytes().len() {
        return u32::MAX;
    }
    h1.dist(&h2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Category;
    use crate::db::ScreenshotRecord;
    use chrono::Utc;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    fn gradient(dir: &Path, name: &str, rising: bool) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_fn(256, 64, |x, _| {
            let v = if rising { x as u8 } else { 255 - x as u8 };
            Rgb([v, v, v])
        })
        .save(&path)
        .unwrap();
        path
    }

    fn record(store: &ScreenshotStore, filepath: &str) -> i64 {
        let now = Utc::now();
        store
            .insert(&ScreenshotRecord {
                id: None,
                filepath: filepath.to_string(),
                original_name: "x.png".to_string(),
                new_name: "x.png".to_string(),
                category: Category::Other,
                description: "x".to_string(),
                ocr_text: String::new(),
                ocr_confidence: 0.0,
                ai_confidence: 0.0,
                tags: Vec::new(),
                file_size: 0,
                created_at: now,
                processed_at: now,
                is_duplicate: false,
                duplicate_of: None,
            })
            .unwrap()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let path = gradient(tmp.path(), "a.png", true);
        let detector = DuplicateDetector::new(ScreenshotStore::in_memory().unwrap(), DEFAULT_THRESHOLD);

        let first = detector.calculate_hash(&path).unwrap();
        for _ in 0..3 {
            assert_eq!(detector.calculate_hash(&path).unwrap(), first);
        }
    }

    #[test]
    fn test_identical_images_are_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let a = gradient(tmp.path(), "a.png", true);
        let b = tmp.path().join("b.png");
        std::fs::copy(&a, &b).unwrap();

        let store = ScreenshotStore::in_memory().unwrap();
        let detector = DuplicateDetector::new(store.clone(), DEFAULT_THRESHOLD);
        let hash_a = detector.calculate_hash(&a).unwrap();
        let hash_b = detector.calculate_hash(&b).unwrap();
        assert_eq!(hamming_distance(&hash_a, &hash_b), 0);

        assert_eq!(detector.check_duplicate(&b).unwrap(), (false, None));
        let id = record(&store, "/a.png");
        detector.store_hash(id, &hash_a, None).unwrap();
        assert_eq!(detector.check_duplicate(&b).unwrap(), (true, Some(id)));
    }

    #[test]
    fn test_different_images_are_not_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let rising = gradient(tmp.path(), "rising.png", true);
        let falling = gradient(tmp.path(), "falling.png", false);

        let store = ScreenshotStore::in_memory().unwrap();
        let detector = DuplicateDetector::new(store.clone(), DEFAULT_THRESHOLD);
        let hash = detector.calculate_hash(&rising).unwrap();
        assert!(hamming_distance(&hash, &detector.calculate_hash(&falling).unwrap()) > DEFAULT_THRESHOLD);

        let id = record(&store, "/rising.png");
        detector.store_hash(id, &hash, None).unwrap();
        assert_eq!(detector.check_duplicate(&falling).unwrap(), (false, None));
    }

    #[test]
    fn test_first_match_in_storage_order_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let path = gradient(tmp.path(), "a.png", true);
        let store = ScreenshotStore::in_memory().unwrap();
        let detector = DuplicateDetector::new(store.clone(), DEFAULT_THRESHOLD);
        let hash = detector.calculate_hash(&path).unwrap();

        let first = record(&store, "/first.png");
        let second = record(&store, "/second.png");
        detector.store_hash(first, &hash, None).unwrap();
        detector.store_hash(second, &hash, Some(first)).unwrap();

        assert_eq!(detector.find_match(&hash).unwrap(), Some(first));
        assert_eq!(store.all_hashes().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_hash_never_matches() {
        assert_eq!(hamming_distance("not base64 !!", "also bad"), u32::MAX);
    }
}
