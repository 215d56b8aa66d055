// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Tesseract recognizer driven through its command line

use image::{DynamicImage, ImageFormat};
use std::process::Command;
use tracing::debug;

use super::{Recognition, TextRecognizer};
use crate::{Result, SnapsortError};

/// Runs `tesseract <image> stdout --oem 3 --psm 6 tsv`
pub struct TesseractCli {
    binary: String,
    language: String,
}

impl TesseractCli {
    pub fn new(binary: Option<String>) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| "tesseract".to_string()),
            language: "eng".to_string(),
        }
    }

    /// Check if the tesseract binary can be executed
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, image: &DynamicImage) -> Result<Recognition> {
        let scratch = tempfile::Builder::new()
            .prefix("snapsort-ocr-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(scratch.path(), ImageFormat::Png)?;

        debug!("Running {} on {:?}", self.binary, scratch.path());
        let output = Command::new(&self.binary)
            .arg(scratch.path())
            .arg("stdout")
            .args(["-l", &self.language, "--oem", "3", "--psm", "6", "tsv"])
            .output()
            .map_err(|e| SnapsortError::Extraction(format!("cannot run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(SnapsortError::Extraction(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Word rows (level 5) of tesseract's TSV output, joined back into lines.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut token_confidences = Vec::new();
    let mut current_line: Option<(&str, &str, &str, &str)> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }

        let line_key = (cols[1], cols[2], cols[3], cols[4]);
        match current_line {
            Some(key) if key == line_key => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        current_line = Some(line_key);
        text.push_str(word);

        if let Ok(conf) = cols[10].trim().parse::<f32>() {
            token_confidences.push(conf);
        }
    }

    Recognition { text, token_confidences }
}
