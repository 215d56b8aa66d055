// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Text extraction with progressive image preprocessing
//!
//! The image is recognized as-is first. While the mean token confidence stays
//! under the threshold, the next step of grayscale, contrast, sharpen and
//! threshold is applied on top of the previous one and recognition re-runs.

pub mod tesseract;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::OcrConfig;
use crate::Result;

pub use tesseract::TesseractCli;

/// Raw output of one recognition pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Per-token confidences as reported by the engine (0-100, negative = none)
    pub token_confidences: Vec<f32>,
}

/// An OCR engine
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<Recognition>;
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Arc<T> {
    fn recognize(&self, image: &DynamicImage) -> Result<Recognition> {
        (**self).recognize(image)
    }
}

/// Preprocessing steps, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preprocess {
    Resize,
    Grayscale,
    Contrast,
    Sharpen,
    Threshold,
}

impl Preprocess {
    /// Escalation ladder used when confidence is too low
    pub const ESCALATION: [Preprocess; 4] = [
        Preprocess::Grayscale,
        Preprocess::Contrast,
        Preprocess::Sharpen,
        Preprocess::Threshold,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Preprocess::Resize => "resize",
            Preprocess::Grayscale => "grayscale",
            Preprocess::Contrast => "contrast",
            Preprocess::Sharpen => "sharpen",
            Preprocess::Threshold => "threshold",
        }
    }

    fn apply(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Preprocess::Resize => image.clone(),
            Preprocess::Grayscale => DynamicImage::ImageLuma8(image.to_luma8()),
            Preprocess::Contrast => DynamicImage::ImageLuma8(enhance_contrast(&image.to_luma8(), CONTRAST_FACTOR)),
            Preprocess::Sharpen => image.filter3x3(&SHARPEN_KERNEL),
            Preprocess::Threshold => DynamicImage::ImageLuma8(threshold(&image.to_luma8(), THRESHOLD_LEVEL)),
        }
    }
}

const CONTRAST_FACTOR: f32 = 2.0;
const THRESHOLD_LEVEL: u8 = 128;
const SHARPEN_KERNEL: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Trimmed text, possibly empty
    pub text: String,
    /// Mean token confidence, 0-100
    pub confidence: f32,
    pub preprocessing_applied: Vec<Preprocess>,
    pub elapsed: Duration,
}

impl ExtractionResult {
    /// The degraded result: no text, zero confidence
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            preprocessing_applied: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Extracts text from screenshot images
pub struct Extractor {
    recognizer: Box<dyn TextRecognizer>,
    min_confidence: f32,
    max_width: u32,
    max_height: u32,
}

impl Extractor {
    pub fn new(recognizer: Box<dyn TextRecognizer>, config: &OcrConfig) -> Self {
        Self {
            recognizer,
            min_confidence: config.min_confidence,
            max_width: config.max_width,
            max_height: config.max_height,
        }
    }

    /// Extract text from the image at `path`. Failures yield an empty result.
    pub fn extract(&self, path: &Path) -> ExtractionResult {
        let start = Instant::now();
        let mut applied = Vec::new();

        match self.run(path, &mut applied) {
            Ok((text, confidence)) => {
                debug!("OCR {:?}: confidence {:.1}, steps {:?}", path, confidence, applied);
                ExtractionResult {
                    text: text.trim().to_string(),
                    confidence,
                    preprocessing_applied: applied,
                    elapsed: start.elapsed(),
                }
            }
            Err(e) => {
                warn!("Text extraction failed for {:?}: {}", path, e);
                ExtractionResult {
                    preprocessing_applied: applied,
                    elapsed: start.elapsed(),
                    ..ExtractionResult::empty()
                }
            }
        }
    }

    fn run(&self, path: &Path, applied: &mut Vec<Preprocess>) -> Result<(String, f32)> {
        let image = image::open(path)?;
        let (mut image, resized) = fit_within(image, self.max_width, self.max_height);
        if resized {
            applied.push(Preprocess::Resize);
        }

        let (mut text, mut confidence) = self.recognize(&image)?;

        for step in Preprocess::ESCALATION {
            if confidence >= self.min_confidence {
                break;
            }
            image = step.apply(&image);
            applied.push(step);
            (text, confidence) = self.recognize(&image)?;
        }

        Ok((text, confidence))
    }

    fn recognize(&self, image: &DynamicImage) -> Result<(String, f32)> {
        let recognition = self.recognizer.recognize(image)?;
        Ok((recognition.text, mean_confidence(&recognition.token_confidences)))
    }
}

/// Downscale (keeping aspect ratio) so the image fits in `max_width` x `max_height`.
pub fn fit_within(image: DynamicImage, max_width: u32, max_height: u32) -> (DynamicImage, bool) {
    let (width, height) = image.dimensions();
    if width <= max_width && height <= max_height {
        return (image, false);
    }
    (image.resize(max_width, max_height, FilterType::Lanczos3), true)
}

/// Mean of the positive token confidences, clamped to 0-100; 0 when there are none.
pub fn mean_confidence(confidences: &[f32]) -> f32 {
    let scored: Vec<f32> = confidences.iter().copied().filter(|c| *c > 0.0).collect();
    if scored.is_empty() {
        return 0.0;
    }
    (scored.iter().sum::<f32>() / scored.len() as f32).clamp(0.0, 100.0)
}

/// Stretch luminance away from the mean by `factor`.
fn enhance_contrast(image: &GrayImage, factor: f32) -> GrayImage {
    let pixels = u64::from(image.width()) * u64::from(image.height());
    let mean = if pixels == 0 {
        0.0
    } else {
        image.pixels().map(|p| u64::from(p[0])).sum::<u64>() as f32 / pixels as f32
    };

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let value = mean + (f32::from(pixel[0]) - mean) * factor;
        pixel[0] = value.round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn threshold(image: &GrayImage, level: u8) -> GrayImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        *pixel = Luma([if pixel[0] > level { 255 } else { 0 }]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    /// Replays a fixed confidence per call and records what it saw
    struct ScriptedRecognizer {
        confidences: Vec<f32>,
        seen: Mutex<Vec<(u32, u32, bool)>>,
    }

    impl ScriptedRecognizer {
        fn new(confidences: &[f32]) -> Self {
            Self { confidences: confidences.to_vec(), seen: Mutex::new(Vec::new()) }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize(&self, image: &DynamicImage) -> Result<Recognition> {
            let mut seen = self.seen.lock().unwrap();
            let call = seen.len();
            seen.push((image.width(), image.height(), image.color() == image::ColorType::L8));
            let confidence = self.confidences.get(call).copied().unwrap_or(0.0);
            Ok(Recognition {
                text: format!("  pass {}  ", call),
                token_confidences: vec![confidence, -1.0, 0.0],
            })
        }
    }

    struct BrokenRecognizer;

    impl TextRecognizer for BrokenRecognizer {
        fn recognize(&self, _image: &DynamicImage) -> Result<Recognition> {
            Err(crate::SnapsortError::Extraction("engine crashed".to_string()))
        }
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let path = dir.join(name);
        RgbImage::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 40, 200]))
            .save(&path)
            .unwrap();
        path
    }

    fn extractor(recognizer: impl TextRecognizer + 'static) -> Extractor {
        Extractor::new(Box::new(recognizer), &OcrConfig::default())
    }

    #[test]
    fn test_mean_confidence_ignores_non_positive() {
        assert_eq!(mean_confidence(&[]), 0.0);
        assert_eq!(mean_confidence(&[-1.0, 0.0]), 0.0);
        assert_eq!(mean_confidence(&[90.0, 0.0, 70.0, -1.0]), 80.0);
        assert_eq!(mean_confidence(&[250.0]), 100.0);
    }

    #[test]
    fn test_confident_first_pass_skips_preprocessing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_png(tmp.path(), "a.png", 64, 32);
        let result = extractor(ScriptedRecognizer::new(&[85.0])).extract(&path);

        assert_eq!(result.text, "pass 0");
        assert_eq!(result.confidence, 85.0);
        assert!(result.preprocessing_applied.is_empty());
    }

    #[test]
    fn test_escalation_stops_when_confident() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_png(tmp.path(), "a.png", 64, 32);
        let recognizer = ScriptedRecognizer::new(&[10.0, 20.0, 75.0]);
        let ext = extractor(recognizer);
        let result = ext.extract(&path);

        assert_eq!(result.preprocessing_applied, vec![Preprocess::Grayscale, Preprocess::Contrast]);
        assert_eq!(result.confidence, 75.0);
        assert_eq!(result.text, "pass 2");
    }

    #[test]
    fn test_all_steps_applied_when_never_confident() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_png(tmp.path(), "a.png", 64, 32);
        let result = extractor(ScriptedRecognizer::new(&[5.0; 5])).extract(&path);

        assert_eq!(result.preprocessing_applied, Preprocess::ESCALATION.to_vec());
        assert!((0.0..=100.0).contains(&result.confidence));
    }

    #[test]
    fn test_large_image_is_resized_within_bounds() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_png(tmp.path(), "wide.png", 3840, 1000);
        let recognizer = Arc::new(ScriptedRecognizer::new(&[99.0]));

        let result = extractor(recognizer.clone()).extract(&path);
        assert_eq!(result.preprocessing_applied, vec![Preprocess::Resize]);

        let seen = recognizer.seen.lock().unwrap();
        let (w, h, _) = seen[0];
        assert!(w <= 1920 && h <= 1080);
        assert_eq!(w, 1920);
    }

    #[test]
    fn test_grayscale_reaches_recognizer() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_png(tmp.path(), "a.png", 16, 16);
        let recognizer = Arc::new(ScriptedRecognizer::new(&[1.0, 99.0]));

        extractor(recognizer.clone()).extract(&path);
        let seen = recognizer.seen.lock().unwrap();
        assert!(!seen[0].2);
        assert!(seen[1].2);
    }

    #[test]
    fn test_unreadable_image_gives_empty_result() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("not_an_image.png");
        std::fs::write(&path, b"definitely not png").unwrap();

        let result = extractor(ScriptedRecognizer::new(&[99.0])).extract(&path);
        assert_eq!(result.text, "");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_engine_error_gives_empty_result() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_png(tmp.path(), "a.png", 16, 16);
        let result = extractor(BrokenRecognizer).extract(&path);
        assert_eq!(result.text, "");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_threshold_is_binary() {
        let image = GrayImage::from_fn(4, 1, |x, _| Luma([[0, 128, 129, 255][x as usize]]));
        let out = threshold(&image, THRESHOLD_LEVEL);
        let values: Vec<u8> = out.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_contrast_spreads_around_mean() {
        let image = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 100 } else { 140 }]));
        let out = enhance_contrast(&image, 2.0);
        assert_eq!(out.get_pixel(0, 0)[0], 80);
        assert_eq!(out.get_pixel(1, 0)[0], 160);
    }
}
