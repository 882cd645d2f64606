// Cached dish-image lookup and write-through storage
//
// Lookup never errors outward: any storage failure degrades to an empty
// result so the pipeline falls through to the next stage. Writes are
// idempotent by content hash, so concurrent writers racing to cache the
// same image are safe.

use lru::LruCache;
use parking_lot::RwLock;
use reqwest::Client;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use crate::core::config::CacheConfig;
use crate::core::errors::{StorageError, StorageResult};
use crate::core::types::CachedImageRecord;
use crate::services::storage::{MetadataStore, ObjectStorage};
use crate::utils::image_ops::{normalize_image_async, validate_image_bytes_async};
use crate::utils::Metrics;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Similarity floor for fuzzy category matches.
const SIMILARITY_FLOOR: f64 = 0.3;

/// Size/grade modifiers dropped during normalization.
const STOP_MODIFIERS: &[&str] = &[
    "large", "small", "medium", "xl", "mini", "jumbo", "special", "deluxe", "premium",
];

/// Normalize a menu item name for matching similar items: lowercase, strip
/// punctuation, collapse whitespace, drop size/grade modifiers.
pub fn normalize_item_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|w| !STOP_MODIFIERS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filesystem-safe slug for object keys, capped at 30 characters.
pub fn slugify(normalized_name: &str) -> String {
    let slug: String = normalized_name
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect();
    slug.chars().take(30).collect()
}

/// Token-set Jaccard similarity over normalized names.
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

/// Coarse food categorization, pluggable so the keyword table can be
/// replaced by a learned classifier without touching cache or search logic.
pub trait CategoryClassifier: Send + Sync {
    fn categorize(&self, name: &str) -> String;
}

/// Keyword-table classifier.
pub struct KeywordClassifier;

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("pizza", &["pizza", "margherita", "pepperoni", "hawaiian"]),
    ("burger", &["burger", "cheeseburger", "hamburger", "patty"]),
    ("pasta", &["pasta", "spaghetti", "penne", "lasagna", "ravioli", "fettuccine"]),
    ("salad", &["salad", "caesar", "greek", "garden"]),
    ("sandwich", &["sandwich", "sub", "hoagie", "panini", "wrap"]),
    ("chicken", &["chicken", "wings", "nuggets", "tenders"]),
    ("seafood", &["fish", "salmon", "tuna", "shrimp", "lobster", "crab"]),
    ("soup", &["soup", "chowder", "bisque", "broth"]),
    ("dessert", &["cake", "pie", "ice cream", "brownie", "cookie", "pudding", "tiramisu"]),
    ("steak", &["steak", "ribeye", "sirloin", "filet"]),
    ("asian", &["sushi", "ramen", "pho", "pad thai", "curry", "stir fry"]),
    ("mexican", &["taco", "burrito", "quesadilla", "enchilada", "fajita"]),
];

pub const GENERAL_CATEGORY: &str = "general";

impl CategoryClassifier for KeywordClassifier {
    fn categorize(&self, name: &str) -> String {
        let name_lower = name.to_lowercase();
        for (category, keywords) in CATEGORY_KEYWORDS {
            if keywords.iter().any(|k| name_lower.contains(k)) {
                return (*category).to_string();
            }
        }
        GENERAL_CATEGORY.to_string()
    }
}

/// Cache layer over object storage plus the metadata table, with an LRU
/// memoization of recent full-limit lookups.
pub struct ImageCacheService {
    objects: Arc<dyn ObjectStorage>,
    records: Arc<dyn MetadataStore>,
    classifier: Arc<dyn CategoryClassifier>,
    http: Client,
    memo: RwLock<LruCache<String, Vec<String>>>,
    max_image_width: u32,
    jpeg_quality: u8,
    metrics: Option<Metrics>,
}

impl ImageCacheService {
    pub fn new(
        objects: Arc<dyn ObjectStorage>,
        records: Arc<dyn MetadataStore>,
        classifier: Arc<dyn CategoryClassifier>,
        config: &CacheConfig,
        metrics: Option<Metrics>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        let memo_entries =
            NonZeroUsize::new(config.lookup_memo_entries.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            objects,
            records,
            classifier,
            http,
            memo: RwLock::new(LruCache::new(memo_entries)),
            max_image_width: config.max_image_width,
            jpeg_quality: config.jpeg_quality,
            metrics,
        }
    }

    pub fn categorize(&self, name: &str) -> String {
        self.classifier.categorize(name)
    }

    /// Look up stored images for a dish: exact normalized-name matches
    /// first, then same-category fuzzy matches above the similarity floor.
    ///
    /// Returns up to `limit` public URLs, best matches first. Lookup
    /// failures return an empty result.
    #[instrument(skip(self, _description))]
    pub async fn search_cached(
        &self,
        name: &str,
        _description: Option<&str>,
        limit: usize,
    ) -> Vec<String> {
        let normalized = normalize_item_name(name);
        if normalized.is_empty() || limit == 0 {
            return Vec::new();
        }

        let memo_key = format!("{}#{}", normalized, limit);
        if let Some(urls) = self.memo.write().get(&memo_key) {
            if let Some(ref m) = self.metrics {
                m.record_cache_hit();
            }
            return urls.clone();
        }

        let mut urls = match self.records.find_by_normalized_name(&normalized, limit).await {
            Ok(rows) => rows.into_iter().map(|r| r.storage_url).collect::<Vec<_>>(),
            Err(e) => {
                error!("Cached image lookup failed for '{}': {}", name, e);
                Vec::new()
            }
        };

        if urls.len() >= limit {
            info!("Found exact cache match for '{}'", name);
        } else {
            let category = self.classifier.categorize(name);
            let remaining = limit - urls.len();
            if category != GENERAL_CATEGORY {
                urls.extend(
                    self.fuzzy_category_matches(&normalized, &category, &urls, remaining)
                        .await,
                );
            }
        }

        if let Some(ref m) = self.metrics {
            if urls.is_empty() {
                m.record_cache_miss();
            } else {
                m.record_cache_hit();
            }
        }

        if urls.len() >= limit {
            self.memo.write().put(memo_key, urls.clone());
        }

        urls
    }

    async fn fuzzy_category_matches(
        &self,
        normalized: &str,
        category: &str,
        existing: &[String],
        remaining: usize,
    ) -> Vec<String> {
        // Fetch extra rows so the similarity filter still has enough to pick from
        let rows = match self.records.find_by_category(category, remaining * 3).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Category lookup failed for '{}': {}", category, e);
                return Vec::new();
            }
        };

        let mut scored: Vec<(f64, String)> = rows
            .into_iter()
            .filter(|r| !existing.contains(&r.storage_url))
            .filter_map(|r| {
                let similarity = jaccard_similarity(&r.normalized_name, normalized);
                (similarity > SIMILARITY_FLOOR).then_some((similarity, r.storage_url))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        if !scored.is_empty() {
            info!(
                "Found {} similar cached images in category '{}'",
                scored.len().min(remaining),
                category
            );
        }
        scored.into_iter().take(remaining).map(|(_, url)| url).collect()
    }

    /// Download an image, normalize it, and store it under the
    /// deterministic key `cached/{category}/{slug}_{hash}.jpg`.
    ///
    /// Returns the permanent public URL. A content-hash collision means the
    /// binary is already stored; the existing URL is returned without a
    /// second write.
    #[instrument(skip(self, description))]
    pub async fn store_image(
        &self,
        image_url: &str,
        name: &str,
        description: Option<&str>,
    ) -> StorageResult<String> {
        let response = self.http.get(image_url).send().await?;
        if !response.status().is_success() {
            return Err(StorageError::InvalidImage {
                reason: format!("download returned {}", response.status()),
            });
        }
        let raw = response.bytes().await?.to_vec();
        self.store_image_bytes(raw, image_url, name, description).await
    }

    /// Normalize and store already-downloaded image bytes.
    pub async fn store_image_bytes(
        &self,
        raw: Vec<u8>,
        original_url: &str,
        name: &str,
        description: Option<&str>,
    ) -> StorageResult<String> {
        if !validate_image_bytes_async(raw.clone()).await {
            return Err(StorageError::InvalidImage {
                reason: "below minimum dimensions or extreme aspect ratio".to_string(),
            });
        }

        let normalized_image = normalize_image_async(raw, self.max_image_width, self.jpeg_quality)
            .await
            .map_err(|e| StorageError::InvalidImage {
                reason: e.to_string(),
            })?;

        // Dedup by content hash before touching storage
        if let Ok(Some(existing)) = self
            .records
            .find_by_content_hash(&normalized_image.content_hash)
            .await
        {
            debug!(
                "Image for '{}' already stored at {} (hash {})",
                name, existing.storage_path, normalized_image.content_hash
            );
            if let Some(ref m) = self.metrics {
                m.record_image_stored(true);
            }
            return Ok(existing.storage_url);
        }

        let normalized_name = normalize_item_name(name);
        let category = self.classifier.categorize(name);
        let storage_path = format!(
            "cached/{}/{}_{}.jpg",
            category,
            slugify(&normalized_name),
            normalized_image.content_hash
        );

        self.objects
            .upload(&storage_path, normalized_image.bytes.clone(), "image/jpeg")
            .await?;
        let storage_url = self.objects.public_url(&storage_path);

        let record = CachedImageRecord {
            storage_path: storage_path.clone(),
            storage_url: storage_url.clone(),
            original_url: original_url.to_string(),
            item_name: name.to_string(),
            normalized_name,
            category,
            description: description.map(str::to_string),
            content_hash: normalized_image.content_hash,
            file_size: normalized_image.bytes.len(),
            image_width: normalized_image.width,
            image_height: normalized_image.height,
            created_at: chrono::Utc::now(),
            is_active: true,
        };
        self.records.insert_record(&record).await?;

        if let Some(ref m) = self.metrics {
            m.record_image_stored(false);
        }
        info!("Cached image for '{}' at {}", name, storage_path);
        Ok(storage_url)
    }

    /// Cache multiple images concurrently. One failed download never sinks
    /// the batch; the returned map only holds the successes, keyed by the
    /// original URL.
    pub async fn cache_images_batch(
        self: &Arc<Self>,
        images: Vec<(String, String, Option<String>)>,
    ) -> std::collections::HashMap<String, String> {
        let tasks: Vec<_> = images
            .into_iter()
            .map(|(url, name, description)| {
                let service = Arc::clone(self);
                tokio::spawn(async move {
                    let stored = service
                        .store_image(&url, &name, description.as_deref())
                        .await;
                    (url, stored)
                })
            })
            .collect();

        let mut mapping = std::collections::HashMap::new();
        for task in tasks {
            match task.await {
                Ok((url, Ok(stored_url))) => {
                    mapping.insert(url, stored_url);
                }
                Ok((url, Err(e))) => {
                    error!("Failed to cache image {}: {}", url, e);
                }
                Err(e) => {
                    error!("Image caching task panicked: {}", e);
                }
            }
        }
        mapping
    }
}
