// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Screenshot categorization from extracted text
//!
//! Informative text goes to the remote model (paced by [`RateLimiter`]);
//! everything else, and every remote failure, takes the keyword fallback.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::gemini::InferenceBackend;
use crate::{Result, SnapsortError};

/// OCR confidence (0-100) required before the remote model is consulted
pub const MIN_OCR_CONFIDENCE: f32 = 30.0;
/// Trimmed text shorter than this skips the remote model
pub const MIN_TEXT_LENGTH: usize = 5;
pub const MAX_DESCRIPTION_LENGTH: usize = 50;
pub const MAX_TAGS: usize = 5;
const MAX_TAG_LENGTH: usize = 32;
/// Characters of OCR text sent to the remote model
pub const MAX_PROMPT_TEXT: usize = 1000;

const FALLBACK_MATCH_CONFIDENCE: f64 = 0.3;
const FALLBACK_MISS_CONFIDENCE: f64 = 0.1;
const DEFAULT_REMOTE_CONFIDENCE: f64 = 0.5;

/// Closed set of screenshot categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Errors,
    Code,
    Memes,
    #[serde(rename = "UI")]
    Ui,
    Docs,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Errors,
        Category::Code,
        Category::Memes,
        Category::Ui,
        Category::Docs,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Errors => "Errors",
            Category::Code => "Code",
            Category::Memes => "Memes",
            Category::Ui => "UI",
            Category::Docs => "Docs",
            Category::Other => "Other",
        }
    }

    /// Exact-name lookup; anything outside the set becomes `Other`
    pub fn parse(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .unwrap_or(Category::Other)
    }

    /// Keywords checked (as lower-case substrings) by the fallback path
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Category::Errors => &[
                "error", "exception", "traceback", "failed", "failure", "crash", "bug", "warning",
            ],
            Category::Code => &[
                "def ", "function", "class ", "import ", "const ", "var ", "let ", "return", "{}",
                "[]", "=>",
            ],
            Category::Memes => &["lol", "lmao", "meme", "funny", "joke", "haha"],
            Category::Ui => &[
                "button", "click", "menu", "dialog", "window", "settings", "preferences",
            ],
            Category::Docs => &[
                "documentation", "readme", "guide", "tutorial", "manual", "instructions",
            ],
            Category::Other => &[],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationSource {
    Remote,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    /// `[a-z0-9_]{1,50}`
    pub description: String,
    pub tags: Vec<String>,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub source: ClassificationSource,
}

/// Enforces a minimum spacing between remote requests
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until `min_interval` has passed since the previous call, then claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("Rate limit: waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Content classifier with a confidence-gated remote path
pub struct Classifier {
    backend: Arc<dyn InferenceBackend>,
    limiter: RateLimiter,
    remote_calls: AtomicUsize,
}

impl Classifier {
    pub fn new(backend: Arc<dyn InferenceBackend>, min_interval: Duration) -> Self {
        Self {
            backend,
            limiter: RateLimiter::new(min_interval),
            remote_calls: AtomicUsize::new(0),
        }
    }

    /// Number of requests sent to the remote model so far
    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::Relaxed)
    }

    /// Classify OCR text. Never fails: remote problems degrade to [`fallback_classification`].
    pub async fn analyze(&self, text: &str, ocr_confidence: f32) -> ClassificationResult {
        if ocr_confidence < MIN_OCR_CONFIDENCE || text.trim().chars().count() < MIN_TEXT_LENGTH {
            debug!("Text not informative enough (confidence {:.1}), using keywords", ocr_confidence);
            return fallback_classification(text);
        }

        match self.classify_remote(text).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Remote classification failed: {}, using keyword fallback", e);
                fallback_classification(text)
            }
        }
    }

    async fn classify_remote(&self, text: &str) -> Result<ClassificationResult> {
        self.limiter.acquire().await;
        self.remote_calls.fetch_add(1, Ordering::Relaxed);

        let truncated: String = text.chars().take(MAX_PROMPT_TEXT).collect();
        let response = self.backend.generate(&build_prompt(&truncated)).await?;
        parse_response(&response)
    }
}

fn build_prompt(text: &str) -> String {
    format!(
        "Categorize the text captured from a screenshot.\n\n\
         Screenshot text:\n{text}\n\n\
         Reply with a single JSON object and nothing else:\n\
         {{\"category\": \"Errors|Code|Memes|UI|Docs|Other\", \
         \"description\": \"short description, under 50 characters\", \
         \"tags\": [\"up to five short tags\"], \
         \"confidence\": number between 0.0 and 1.0}}"
    )
}

#[derive(Deserialize)]
struct RemoteVerdict {
    category: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<serde_json::Value>,
    confidence: Option<serde_json::Value>,
}

/// Parse the first flat JSON object in a model reply.
pub fn parse_response(raw: &str) -> Result<ClassificationResult> {
    let object = first_json_object(raw)
        .ok_or_else(|| SnapsortError::Inference("no JSON object in response".to_string()))?;
    let verdict: RemoteVerdict = serde_json::from_str(object)?;

    let confidence = verdict
        .confidence
        .and_then(|c| match c {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(DEFAULT_REMOTE_CONFIDENCE);

    let tags = verdict
        .tags
        .iter()
        .filter_map(|t| t.as_str())
        .map(|t| t.trim().chars().take(MAX_TAG_LENGTH).collect::<String>())
        .filter(|t| !t.is_empty())
        .take(MAX_TAGS)
        .collect();

    Ok(ClassificationResult {
        category: Category::parse(verdict.category.as_deref().unwrap_or("Other").trim()),
        description: sanitize_description(verdict.description.as_deref().unwrap_or("")),
        tags,
        confidence: if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { DEFAULT_REMOTE_CONFIDENCE },
        source: ClassificationSource::Remote,
    })
}

/// First `{...}` span containing no nested braces
fn first_json_object(raw: &str) -> Option<&str> {
    let mut start = None;
    for (i, c) in raw.char_indices() {
        match c {
            '{' => start = Some(i),
            '}' => {
                if let Some(s) = start {
                    return Some(&raw[s..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Keyword categorization used when the remote model is skipped or unavailable.
pub fn fallback_classification(text: &str) -> ClassificationResult {
    let lower = text.to_lowercase();

    for category in Category::ALL {
        if category.keywords().iter().any(|k| lower.contains(k)) {
            let name = category.as_str().to_lowercase();
            return ClassificationResult {
                category,
                description: sanitize_description(&format!("{}_content", name)),
                tags: vec![name],
                confidence: FALLBACK_MATCH_CONFIDENCE,
                source: ClassificationSource::Fallback,
            };
        }
    }

    ClassificationResult {
        category: Category::Other,
        description: "unknown_content".to_string(),
        tags: Vec::new(),
        confidence: FALLBACK_MISS_CONFIDENCE,
        source: ClassificationSource::Fallback,
    }
}

/// Reduce `raw` to a non-empty `[a-z0-9_]` slug of at most 50 characters.
pub fn sanitize_description(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.to_lowercase().replace(' ', "_").chars() {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            continue;
        }
        if c == '_' && slug.ends_with('_') {
            continue;
        }
        slug.push(c);
    }

    let mut slug: String = slug.trim_matches('_').chars().take(MAX_DESCRIPTION_LENGTH).collect();
    if slug.is_empty() {
        slug.push_str("screenshot");
    }
    slug
}
