// Shared data types for the image-resolution pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// One extracted menu item awaiting an image.
///
/// Created once per dish at pipeline entry, immutable during the run. The id
/// is opaque and stays stable across all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItemRequest {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MenuItemRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Which stage claimed an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Cached,
    Semantic,
    Search,
    Generated,
    Fallback,
}

impl ImageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSource::Cached => "cached",
            ImageSource::Semantic => "semantic",
            ImageSource::Search => "search",
            ImageSource::Generated => "generated",
            ImageSource::Fallback => "fallback",
        }
    }
}

/// A candidate image for one menu item.
///
/// Scores are source-dependent confidences and are never compared across
/// sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCandidate {
    pub url: String,
    pub source: ImageSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl ImageCandidate {
    pub fn new(url: impl Into<String>, source: ImageSource) -> Self {
        Self {
            url: url.into(),
            source,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

/// Persistent metadata row for a stored dish image.
///
/// `content_hash` is unique per stored binary (the dedup key);
/// `normalized_name` is not unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedImageRecord {
    pub storage_path: String,
    pub storage_url: String,
    pub original_url: String,
    pub item_name: String,
    pub normalized_name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub content_hash: String,
    pub file_size: usize,
    pub image_width: u32,
    pub image_height: u32,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// One hit from the curated dish-photo embedding index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarDish {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub similarity: f32,
    pub image_url: String,
}

/// The result map handed back to the caller.
pub type ResolvedImages = HashMap<String, Vec<ImageCandidate>>;

/// Per-run analytics for one menu's resolution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionSummary {
    pub total_items: usize,
    pub cached: usize,
    pub semantic: usize,
    pub search: usize,
    pub generated: usize,
    pub fallback: usize,
    pub cache_stage_ms: f64,
    pub semantic_stage_ms: f64,
    pub search_stage_ms: f64,
    pub generation_stage_ms: f64,
    pub total_ms: f64,
}

impl ResolutionSummary {
    pub fn record_source(&mut self, source: ImageSource) {
        match source {
            ImageSource::Cached => self.cached += 1,
            ImageSource::Semantic => self.semantic += 1,
            ImageSource::Search => self.search += 1,
            ImageSource::Generated => self.generated += 1,
            ImageSource::Fallback => self.fallback += 1,
        }
    }
}

/// Millisecond helper used when filling summaries from `Instant` spans.
pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
