// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Per-file processing: extract, classify, organize, persist, deduplicate
//!
//! Each stage yields a [`StageOutcome`]. A degraded stage carries a safe
//! substitute value forward, so only a missing source file stops a run.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::classifier::{fallback_classification, Category, ClassificationResult, Classifier};
use crate::config::AppConfig;
use crate::db::{ScreenshotRecord, ScreenshotStore, StoreStats};
use crate::dedup::{perceptual_hash, DuplicateDetector};
use crate::extractor::tesseract::TesseractCli;
use crate::extractor::{ExtractionResult, Extractor, TextRecognizer};
use crate::gemini::{GeminiClient, InferenceBackend};
use crate::organizer::FileOrganizer;
use crate::watcher::{is_eligible, FileProcessor, ScreenshotWatcher};
use crate::{Result, SnapsortError};

/// Result of one pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Ok(T),
    /// The stage failed; the value is its substitute
    Degraded(T, String),
}

impl<T> StageOutcome<T> {
    /// Keep the stage's value, or substitute `fallback()` and remember the error
    pub fn from_result(result: Result<T>, fallback: impl FnOnce() -> T) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(e) => Self::Degraded(fallback(), e.to_string()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(..))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Degraded(_, reason) => Some(reason),
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Ok(value) | Self::Degraded(value, _) => value,
        }
    }
}

/// Stages of the per-file flow, as reported in [`ProcessOutcome::degraded`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Classify,
    Organize,
    Persist,
    Deduplicate,
}

/// What happened to one screenshot
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub record_id: Option<i64>,
    /// Final location (the source path if organizing failed)
    pub path: PathBuf,
    pub category: Category,
    pub duplicate_of: Option<i64>,
    pub degraded: Vec<Stage>,
}

impl ProcessOutcome {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }
}

/// The components one file passes through
struct Stages {
    extractor: Arc<Extractor>,
    classifier: Classifier,
    organizer: FileOrganizer,
    store: ScreenshotStore,
    detector: DuplicateDetector,
    /// Held for a whole file so runs never interleave
    busy: Mutex<()>,
}

impl Stages {
    async fn run(&self, path: &Path) -> Result<ProcessOutcome> {
        let _guard = self.busy.lock().await;
        info!("Processing screenshot: {:?}", path);

        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SnapsortError::NotFound(path.to_path_buf()),
            _ => SnapsortError::FileSystem(e),
        })?;
        let created_at: DateTime<Utc> = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or_else(|_| SystemTime::now())
            .into();
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut degraded = Vec::new();

        let extraction = self.extract(path).await;
        note(&mut degraded, Stage::Extract, &extraction);
        let extraction = extraction.into_value();

        let classification = self.classify(&extraction).await;
        note(&mut degraded, Stage::Classify, &classification);
        let classification = classification.into_value();

        let organized = StageOutcome::from_result(
            self.organizer.organize(
                path,
                classification.category,
                &classification.description,
                created_at.with_timezone(&Local),
            ),
            || (path.to_path_buf(), original_name.clone()),
        );
        note(&mut degraded, Stage::Organize, &organized);
        let (final_path, new_name) = organized.into_value();

        let record = ScreenshotRecord {
            id: None,
            filepath: final_path.to_string_lossy().into_owned(),
            original_name,
            new_name,
            category: classification.category,
            description: classification.description,
            ocr_text: extraction.text,
            ocr_confidence: f64::from(extraction.confidence),
            ai_confidence: classification.confidence,
            tags: classification.tags,
            file_size: metadata.len(),
            created_at,
            processed_at: Utc::now(),
            is_duplicate: false,
            duplicate_of: None,
        };

        let record_id = match self.store.insert(&record) {
            Ok(id) => {
                debug!("Indexed {:?} as {}", final_path, id);
                Some(id)
            }
            Err(e) => {
                error!("Database insert failed for {:?}: {}", final_path, e);
                degraded.push(Stage::Persist);
                None
            }
        };

        let mut duplicate_of = None;
        if let Some(id) = record_id {
            match self.deduplicate(id, &final_path).await {
                Ok(found) => duplicate_of = found,
                Err(e) => {
                    error!("Duplicate check failed for {:?}: {}", final_path, e);
                    degraded.push(Stage::Deduplicate);
                }
            }
        }

        info!("Processed {:?} as {}", final_path, record.category);
        Ok(ProcessOutcome {
            record_id,
            path: final_path,
            category: record.category,
            duplicate_of,
            degraded,
        })
    }

    async fn extract(&self, path: &Path) -> StageOutcome<ExtractionResult> {
        let extractor = Arc::clone(&self.extractor);
        let owned = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || extractor.extract(&owned))
            .await
            .map_err(|e| SnapsortError::Extraction(format!("extraction task failed: {}", e)));
        StageOutcome::from_result(result, ExtractionResult::empty)
    }

    async fn classify(&self, extraction: &ExtractionResult) -> StageOutcome<ClassificationResult> {
        let analysis = AssertUnwindSafe(self.classifier.analyze(&extraction.text, extraction.confidence))
            .catch_unwind()
            .await;
        match analysis {
            Ok(result) => StageOutcome::Ok(result),
            Err(_) => StageOutcome::Degraded(
                fallback_classification(&extraction.text),
                "classifier panicked".to_string(),
            ),
        }
    }

    async fn deduplicate(&self, id: i64, path: &Path) -> Result<Option<i64>> {
        let owned = path.to_path_buf();
        let hash = tokio::task::spawn_blocking(move || perceptual_hash(&owned))
            .await
            .map_err(|e| SnapsortError::Extraction(format!("hash task failed: {}", e)))??;
        let found = self.detector.find_match(&hash)?;
        if let Some(original) = found {
            self.store.mark_duplicate(id, Some(original))?;
            info!("Screenshot {} is a duplicate of {}", id, original);
        }
        self.detector.store_hash(id, &hash, found)?;
        Ok(found)
    }
}

fn note<T>(degraded: &mut Vec<Stage>, stage: Stage, outcome: &StageOutcome<T>) {
    if let Some(reason) = outcome.reason() {
        warn!("{:?} stage degraded: {}", stage, reason);
        degraded.push(stage);
    }
}

#[async_trait]
impl FileProcessor for Stages {
    async fn process(&self, path: PathBuf) -> Result<()> {
        self.run(&path).await.map(|_| ())
    }
}

/// Screenshot processing pipeline
pub struct Pipeline {
    config: AppConfig,
    stages: Arc<Stages>,
    watcher: Option<ScreenshotWatcher>,
}

impl Pipeline {
    /// Build the pipeline with Tesseract and Gemini. Fails if the API key is missing.
    pub fn new(config: AppConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        let backend = GeminiClient::new(&config.ai, api_key)?;
        info!("Remote classifier model: {}", backend.model());

        let tesseract = TesseractCli::new(config.ocr.tesseract_path.clone());
        if !tesseract.is_available() {
            warn!("Tesseract not found; text extraction will return empty results");
        }

        let store = ScreenshotStore::open(&config.database.path)?;
        info!("Database initialized: {:?}", config.database.path);

        Ok(Self::with_components(config, Box::new(tesseract), Arc::new(backend), store))
    }

    /// Build the pipeline around the given recognizer, inference backend and store
    pub fn with_components(
        config: AppConfig,
        recognizer: Box<dyn TextRecognizer>,
        backend: Arc<dyn InferenceBackend>,
        store: ScreenshotStore,
    ) -> Self {
        let stages = Stages {
            extractor: Arc::new(Extractor::new(recognizer, &config.ocr)),
            classifier: Classifier::new(backend, config.ai.min_interval()),
            organizer: FileOrganizer::new(config.screenshots_dir.clone()),
            detector: DuplicateDetector::new(store.clone(), config.duplicates.threshold),
            store,
            busy: Mutex::new(()),
        };
        Self {
            config,
            stages: Arc::new(stages),
            watcher: None,
        }
    }

    /// Process one file. Only a missing source is an error; every other
    /// failure shows up in [`ProcessOutcome::degraded`].
    pub async fn process_screenshot(&self, path: &Path) -> Result<ProcessOutcome> {
        self.stages.run(path).await
    }

    /// Process every eligible image directly inside `dir`, in name order.
    /// Returns the number processed.
    pub async fn scan_directory(&self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(SnapsortError::Config(format!("Not a directory: {:?}", dir)));
        }
        info!("Scanning directory: {:?}", dir);

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_eligible(path))
            .collect();
        files.sort();

        let mut count = 0;
        for path in files {
            match self.process_screenshot(&path).await {
                Ok(_) => count += 1,
                Err(e) => error!("Failed to process {:?}: {}", path, e),
            }
        }

        info!("Scanned {} files", count);
        Ok(count)
    }

    /// Begin watching the configured directories
    pub fn start(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let mut watcher = ScreenshotWatcher::new(
            self.config.monitored_dirs.clone(),
            self.config.watcher.clone(),
        );
        watcher.start(Arc::clone(&self.stages) as Arc<dyn FileProcessor>)?;
        info!("Monitoring {} directories", self.config.monitored_dirs.len());
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stop the watcher (bounded wait), then release the store
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping pipeline...");
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        self.stages.store.close()?;
        info!("Pipeline stopped");
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(ScreenshotWatcher::is_running)
    }

    pub fn store(&self) -> &ScreenshotStore {
        &self.stages.store
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<ScreenshotRecord>> {
        self.stages.store.search(query, limit)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.stages.store.get_stats()
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<ScreenshotRecord>> {
        self.stages.store.get_recent(limit)
    }

    /// Number of requests the classifier has sent to the remote model
    pub fn remote_calls(&self) -> usize {
        self.stages.classifier.remote_calls()
    }
}
