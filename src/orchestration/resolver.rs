// Image resolver: main pipeline coordinator
//
// Items cascade through cache → semantic → search → generate, each stage
// running concurrently across its subset of still-unresolved items. A
// stage claims an item by producing at least one candidate; claimed items
// skip every later stage. Items that exhaust all stages receive the static
// placeholder, so no item is ever left unresolved.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument};

use crate::core::errors::PipelineResult;
use crate::core::types::{
    duration_ms, ImageCandidate, ImageSource, MenuItemRequest, ResolutionSummary, ResolvedImages,
};
use crate::services::cache::ImageCacheService;
use crate::services::generation::GenerativeFallback;
use crate::services::progress::ProgressTracker;
use crate::services::search::WebImageSearcher;
use crate::services::semantic::SemanticMatcher;
use crate::utils::Metrics;

// Progress checkpoints per stage boundary
const PERCENT_CACHE: f32 = 15.0;
const PERCENT_SEMANTIC: f32 = 35.0;
const PERCENT_SEARCH: f32 = 70.0;
const PERCENT_GENERATION: f32 = 90.0;
const PERCENT_DONE: f32 = 100.0;

/// Pipeline coordinator for one menu's worth of items.
///
/// All collaborators are injected at construction; the resolver owns no
/// hidden global state.
pub struct ImageResolver {
    cache: Arc<ImageCacheService>,
    semantic: Arc<SemanticMatcher>,
    searcher: Arc<WebImageSearcher>,
    generator: Arc<GenerativeFallback>,
    tracker: ProgressTracker,
    item_semaphore: Arc<Semaphore>,
    images_per_item: usize,
    metrics: Option<Metrics>,
}

impl ImageResolver {
    pub fn new(
        cache: Arc<ImageCacheService>,
        semantic: Arc<SemanticMatcher>,
        searcher: Arc<WebImageSearcher>,
        generator: Arc<GenerativeFallback>,
        tracker: ProgressTracker,
        max_concurrent_items: usize,
        images_per_item: usize,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            cache,
            semantic,
            searcher,
            generator,
            tracker,
            item_semaphore: Arc::new(Semaphore::new(max_concurrent_items.max(1))),
            images_per_item: images_per_item.max(1),
            metrics,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Resolve an image list for every item of one menu.
    ///
    /// The only error that reaches the caller is a task-setup failure;
    /// every downstream failure degrades to the placeholder.
    pub async fn resolve_images_for_menu(
        &self,
        task_id: &str,
        items: &[MenuItemRequest],
    ) -> PipelineResult<ResolvedImages> {
        let (images, _summary) = self.resolve_with_summary(task_id, items).await?;
        Ok(images)
    }

    #[instrument(skip(self, items), fields(task_id = task_id, total_items = items.len()))]
    pub async fn resolve_with_summary(
        &self,
        task_id: &str,
        items: &[MenuItemRequest],
    ) -> PipelineResult<(ResolvedImages, ResolutionSummary)> {
        let started = Instant::now();
        self.tracker.start_tracking(task_id, items.len())?;

        let mut summary = ResolutionSummary {
            total_items: items.len(),
            ..Default::default()
        };
        let mut resolved: ResolvedImages = HashMap::new();
        let mut unresolved: Vec<MenuItemRequest> = items.to_vec();

        info!("Resolving images for {} items", items.len());

        // ===== STAGE 1: CACHE LOOKUP =====
        let stage_start = Instant::now();
        let cache_hits = self.run_cache_stage(&unresolved).await;
        summary.cache_stage_ms = duration_ms(stage_start.elapsed());
        self.record_stage("cache", stage_start);
        self.claim(&mut resolved, &mut unresolved, cache_hits, &mut summary);
        self.report(task_id, "cache_lookup", PERCENT_CACHE, &resolved);

        // ===== STAGE 2: SEMANTIC MATCH =====
        if self.semantic.is_enabled() && !unresolved.is_empty() {
            let stage_start = Instant::now();
            let semantic_hits = self.run_semantic_stage(&unresolved).await;
            summary.semantic_stage_ms = duration_ms(stage_start.elapsed());
            self.record_stage("semantic", stage_start);
            self.claim(&mut resolved, &mut unresolved, semantic_hits, &mut summary);
        }
        self.report(task_id, "semantic_match", PERCENT_SEMANTIC, &resolved);

        // ===== STAGE 3: WEB IMAGE SEARCH =====
        if self.searcher.is_enabled() && !unresolved.is_empty() {
            let stage_start = Instant::now();
            let search_hits = self
                .searcher
                .search_images_batch(&unresolved, self.images_per_item)
                .await;
            summary.search_stage_ms = duration_ms(stage_start.elapsed());
            self.record_stage("search", stage_start);
            self.claim(&mut resolved, &mut unresolved, search_hits, &mut summary);
        }
        self.report(task_id, "image_search", PERCENT_SEARCH, &resolved);

        // ===== STAGE 4: GENERATIVE FALLBACK =====
        if self.generator.is_enabled() && !unresolved.is_empty() {
            let stage_start = Instant::now();
            let generated = self.generator.generate_batch(&unresolved).await;
            summary.generation_stage_ms = duration_ms(stage_start.elapsed());
            self.record_stage("generation", stage_start);
            let generated: HashMap<String, Vec<ImageCandidate>> = generated
                .into_iter()
                .map(|(id, candidate)| (id, vec![candidate]))
                .collect();
            self.claim(&mut resolved, &mut unresolved, generated, &mut summary);
        }
        self.report(task_id, "image_generation", PERCENT_GENERATION, &resolved);

        // ===== PLACEHOLDER BACKSTOP =====
        for item in unresolved.drain(..) {
            let placeholder = self.generator.placeholder();
            summary.record_source(placeholder.source);
            if let Some(ref m) = self.metrics {
                m.record_resolution(placeholder.source);
            }
            resolved.insert(item.id, vec![placeholder]);
        }

        summary.total_ms = duration_ms(started.elapsed());
        if let Some(ref m) = self.metrics {
            m.record_menu_processed(items.len());
        }
        self.report(task_id, "finalizing", PERCENT_DONE, &resolved);
        self.tracker.complete_task(task_id, true);

        info!(
            "Resolved {} items in {:.0}ms (cached: {}, semantic: {}, search: {}, generated: {}, fallback: {})",
            summary.total_items,
            summary.total_ms,
            summary.cached,
            summary.semantic,
            summary.search,
            summary.generated,
            summary.fallback,
        );

        Ok((resolved, summary))
    }

    async fn run_cache_stage(
        &self,
        items: &[MenuItemRequest],
    ) -> HashMap<String, Vec<ImageCandidate>> {
        let tasks: Vec<_> = items
            .iter()
            .map(|item| {
                let cache = Arc::clone(&self.cache);
                let semaphore = Arc::clone(&self.item_semaphore);
                let item = item.clone();
                let limit = self.images_per_item;
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let urls = cache
                        .search_cached(&item.name, item.description.as_deref(), limit)
                        .await;
                    let candidates: Vec<ImageCandidate> = urls
                        .into_iter()
                        .map(|url| ImageCandidate::new(url, ImageSource::Cached))
                        .collect();
                    (item.id, candidates)
                })
            })
            .collect();

        collect_stage_results(tasks).await
    }

    async fn run_semantic_stage(
        &self,
        items: &[MenuItemRequest],
    ) -> HashMap<String, Vec<ImageCandidate>> {
        let tasks: Vec<_> = items
            .iter()
            .map(|item| {
                let semantic = Arc::clone(&self.semantic);
                let semaphore = Arc::clone(&self.item_semaphore);
                let item = item.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let candidates = semantic
                        .find_matches(&item.name, item.description.as_deref())
                        .await;
                    (item.id, candidates)
                })
            })
            .collect();

        collect_stage_results(tasks).await
    }

    /// Move items the stage produced candidates for from unresolved to
    /// resolved; a claim is terminal.
    fn claim(
        &self,
        resolved: &mut ResolvedImages,
        unresolved: &mut Vec<MenuItemRequest>,
        stage_output: HashMap<String, Vec<ImageCandidate>>,
        summary: &mut ResolutionSummary,
    ) {
        for (id, candidates) in stage_output {
            if candidates.is_empty() || resolved.contains_key(&id) {
                continue;
            }
            let source = candidates[0].source;
            summary.record_source(source);
            if let Some(ref m) = self.metrics {
                m.record_resolution(source);
            }
            resolved.insert(id, candidates);
        }
        unresolved.retain(|item| !resolved.contains_key(&item.id));
    }

    fn report(&self, task_id: &str, stage: &str, percent: f32, resolved: &ResolvedImages) {
        let item_images: serde_json::Map<String, serde_json::Value> = resolved
            .iter()
            .filter_map(|(id, candidates)| {
                candidates
                    .first()
                    .map(|c| (id.clone(), serde_json::Value::String(c.url.clone())))
            })
            .collect();
        self.tracker.update_progress(
            task_id,
            stage,
            percent,
            Some(serde_json::json!({
                "resolved_count": resolved.len(),
                "item_images": item_images,
            })),
        );
    }

    fn record_stage(&self, stage: &'static str, start: Instant) {
        if let Some(ref m) = self.metrics {
            m.record_stage_duration(stage, start.elapsed());
        }
    }
}

/// allSettled-style collection: a failed or panicked item task leaves that
/// item unresolved instead of sinking the stage.
async fn collect_stage_results(
    tasks: Vec<tokio::task::JoinHandle<(String, Vec<ImageCandidate>)>>,
) -> HashMap<String, Vec<ImageCandidate>> {
    let mut map = HashMap::new();
    for result in join_all(tasks).await {
        match result {
            Ok((id, candidates)) => {
                map.insert(id, candidates);
            }
            Err(e) => {
                error!("Stage task failed: {:?}", e);
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheConfig, SemanticConfig};
    use crate::core::types::CachedImageRecord;
    use crate::middleware::backoff::RetryPolicy;
    use crate::middleware::rate_limiter::{RateLimiter, RateLimiterConfig};
    use crate::services::cache::KeywordClassifier;
    use crate::services::storage::fakes::{MemoryMetadataStore, MemoryObjectStorage};
    use std::time::Duration;

    fn cache_config() -> CacheConfig {
        CacheConfig {
            bucket: "menu-images-cache".to_string(),
            max_image_width: 1920,
            jpeg_quality: 85,
            lookup_memo_entries: 16,
        }
    }

    fn resolver_with_records(records: Arc<MemoryMetadataStore>) -> ImageResolver {
        let objects = Arc::new(MemoryObjectStorage::default());
        let cache = Arc::new(ImageCacheService::new(
            objects,
            Arc::clone(&records) as Arc<dyn crate::services::storage::MetadataStore>,
            Arc::new(KeywordClassifier),
            &cache_config(),
            None,
        ));
        let semantic = Arc::new(SemanticMatcher::new(
            None,
            Arc::clone(&records) as Arc<dyn crate::services::storage::MetadataStore>,
            &SemanticConfig {
                enabled: true,
                similarity_threshold: 0.7,
                top_k: 3,
            },
        ));
        let searcher = Arc::new(WebImageSearcher::new(None, Arc::clone(&cache), None));
        let generator = Arc::new(GenerativeFallback::new(
            None,
            RateLimiter::new(RateLimiterConfig::default()),
            RetryPolicy::new(3),
            Arc::clone(&cache),
            "https://placeholder.test/unavailable.png".to_string(),
            None,
        ));
        ImageResolver::new(
            cache,
            semantic,
            searcher,
            generator,
            ProgressTracker::with_retention(Duration::from_secs(1)),
            8,
            2,
            None,
        )
    }

    fn cached_record(normalized_name: &str, category: &str, url: &str) -> CachedImageRecord {
        CachedImageRecord {
            storage_path: format!("cached/{}/{}.jpg", category, normalized_name),
            storage_url: url.to_string(),
            original_url: "https://example.com/src.jpg".to_string(),
            item_name: normalized_name.to_string(),
            normalized_name: normalized_name.to_string(),
            category: category.to_string(),
            description: None,
            content_hash: format!("hash-{}", url.len()),
            file_size: 1000,
            image_width: 640,
            image_height: 480,
            created_at: chrono::Utc::now(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_every_item_resolves_exactly_once() {
        // All provider stages disabled: everything must land on the
        // placeholder, nothing may be left unresolved
        let resolver = resolver_with_records(Arc::new(MemoryMetadataStore::default()));
        let items = vec![
            MenuItemRequest::new("1", "Margherita Pizza"),
            MenuItemRequest::new("2", "Espresso"),
            MenuItemRequest::new("3", "Caesar Salad"),
        ];

        let (images, summary) = resolver.resolve_with_summary("task-1", &items).await.unwrap();

        assert_eq!(images.len(), 3);
        for item in &items {
            let candidates = &images[&item.id];
            assert_eq!(candidates.len(), 1);
            assert_eq!(candidates[0].source, ImageSource::Fallback);
        }
        assert_eq!(summary.fallback, 3);
        assert_eq!(
            summary.cached + summary.semantic + summary.search + summary.generated,
            0
        );
    }

    #[tokio::test]
    async fn test_cached_item_skips_later_stages() {
        let records = Arc::new(MemoryMetadataStore::default());
        records.records.lock().push(cached_record(
            "margherita pizza",
            "pizza",
            "https://cache/pizza.jpg",
        ));

        let resolver = resolver_with_records(records);
        let items = vec![
            MenuItemRequest::new("pizza", "Margherita Pizza"),
            MenuItemRequest::new("espresso", "Espresso"),
        ];

        let (images, summary) = resolver.resolve_with_summary("task-2", &items).await.unwrap();

        assert_eq!(images["pizza"][0].source, ImageSource::Cached);
        assert_eq!(images["pizza"][0].url, "https://cache/pizza.jpg");
        // Espresso had no cached image and every provider is disabled
        assert_ne!(images["espresso"][0].source, ImageSource::Cached);
        assert_eq!(summary.cached, 1);
        assert_eq!(summary.fallback, 1);
    }

    #[tokio::test]
    async fn test_progress_reaches_hundred_on_success() {
        let resolver = resolver_with_records(Arc::new(MemoryMetadataStore::default()));
        let items = vec![MenuItemRequest::new("1", "Espresso")];

        resolver
            .resolve_images_for_menu("task-3", &items)
            .await
            .unwrap();

        let snapshot = resolver.tracker().get_progress("task-3").unwrap();
        assert_eq!(snapshot.progress, 100.0);
        assert_eq!(
            snapshot.status,
            crate::services::progress::ProgressStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_duplicate_task_id_is_setup_error() {
        let resolver = resolver_with_records(Arc::new(MemoryMetadataStore::default()));
        let items = vec![MenuItemRequest::new("1", "Espresso")];

        resolver.resolve_images_for_menu("dup", &items).await.unwrap();
        let second = resolver.resolve_images_for_menu("dup", &items).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_progress_metadata_carries_item_images() {
        let records = Arc::new(MemoryMetadataStore::default());
        records.records.lock().push(cached_record(
            "margherita pizza",
            "pizza",
            "https://cache/pizza.jpg",
        ));
        let resolver = resolver_with_records(records);

        let (_id, mut rx) = resolver.tracker().subscribe("task-4");
        let items = vec![MenuItemRequest::new("pizza", "Margherita Pizza")];
        resolver
            .resolve_images_for_menu("task-4", &items)
            .await
            .unwrap();

        // The cache-stage update must carry the per-item image assignment
        let update = rx.recv().await.unwrap();
        assert_eq!(update.stage, "cache_lookup");
        assert_eq!(
            update.stage_metadata["item_images"]["pizza"],
            "https://cache/pizza.jpg"
        );
    }
}
