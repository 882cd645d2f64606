use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::ImageSource;

/// Global metrics collector for the application.
///
/// Tracks provider usage, cache performance, stage durations, and per-source
/// resolution counts. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Provider call metrics
    search_calls_total: AtomicUsize,
    search_calls_failed: AtomicUsize,
    generation_calls_total: AtomicUsize,
    generation_calls_failed: AtomicUsize,
    generation_rate_limit_hits: AtomicUsize,
    provider_latency_ms: RwLock<Vec<u64>>,

    // Cache metrics
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    images_stored: AtomicUsize,
    store_dedup_hits: AtomicUsize,

    // Resolution metrics
    resolved_by_source: DashMap<&'static str, AtomicUsize>,
    menus_processed: AtomicUsize,
    items_processed: AtomicUsize,

    // Stage duration metrics
    stage_duration_ms: DashMap<&'static str, RwLock<Vec<u64>>>,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    // Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                search_calls_total: AtomicUsize::new(0),
                search_calls_failed: AtomicUsize::new(0),
                generation_calls_total: AtomicUsize::new(0),
                generation_calls_failed: AtomicUsize::new(0),
                generation_rate_limit_hits: AtomicUsize::new(0),
                provider_latency_ms: RwLock::new(Vec::new()),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                images_stored: AtomicUsize::new(0),
                store_dedup_hits: AtomicUsize::new(0),
                resolved_by_source: DashMap::new(),
                menus_processed: AtomicUsize::new(0),
                items_processed: AtomicUsize::new(0),
                stage_duration_ms: DashMap::new(),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_search_call(&self, success: bool, duration: Duration) {
        self.inner.search_calls_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner.search_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .provider_latency_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_generation_call(&self, success: bool, duration: Duration) {
        self.inner
            .generation_calls_total
            .fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner
                .generation_calls_failed
                .fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .provider_latency_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_rate_limit_hit(&self) {
        self.inner
            .generation_rate_limit_hits
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image_stored(&self, deduplicated: bool) {
        self.inner.images_stored.fetch_add(1, Ordering::Relaxed);
        if deduplicated {
            self.inner.store_dedup_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_resolution(&self, source: ImageSource) {
        self.inner
            .resolved_by_source
            .entry(source.as_str())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_menu_processed(&self, item_count: usize) {
        self.inner.menus_processed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .items_processed
            .fetch_add(item_count, Ordering::Relaxed);
    }

    pub fn record_stage_duration(&self, stage: &'static str, duration: Duration) {
        self.inner
            .stage_duration_ms
            .entry(stage)
            .or_insert_with(|| RwLock::new(Vec::new()))
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn source_count(&self, source: &'static str) -> usize {
        self.inner
            .resolved_by_source
            .get(source)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn stage_avg(&self, stage: &'static str) -> u64 {
        self.inner
            .stage_duration_ms
            .get(stage)
            .map(|v| avg(&v.read()))
            .unwrap_or(0)
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.inner.provider_latency_ms.read();
        let latency_avg = avg(&latency);
        let latency_p95 = percentile(&latency, 0.95);
        drop(latency);

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            search_calls_total: self.inner.search_calls_total.load(Ordering::Relaxed),
            search_calls_failed: self.inner.search_calls_failed.load(Ordering::Relaxed),
            generation_calls_total: self.inner.generation_calls_total.load(Ordering::Relaxed),
            generation_calls_failed: self.inner.generation_calls_failed.load(Ordering::Relaxed),
            generation_rate_limit_hits: self
                .inner
                .generation_rate_limit_hits
                .load(Ordering::Relaxed),
            provider_latency_avg_ms: latency_avg,
            provider_latency_p95_ms: latency_p95,
            cache_hits,
            cache_misses,
            cache_hit_rate,
            images_stored: self.inner.images_stored.load(Ordering::Relaxed),
            store_dedup_hits: self.inner.store_dedup_hits.load(Ordering::Relaxed),
            resolved_cached: self.source_count("cached"),
            resolved_semantic: self.source_count("semantic"),
            resolved_search: self.source_count("search"),
            resolved_generated: self.source_count("generated"),
            resolved_fallback: self.source_count("fallback"),
            cache_stage_avg_ms: self.stage_avg("cache"),
            semantic_stage_avg_ms: self.stage_avg("semantic"),
            search_stage_avg_ms: self.stage_avg("search"),
            generation_stage_avg_ms: self.stage_avg("generation"),
            menus_processed: self.inner.menus_processed.load(Ordering::Relaxed),
            items_processed: self.inner.items_processed.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP search_calls_total Total image search provider calls
# TYPE search_calls_total counter
search_calls_total {{}} {}

# HELP search_calls_failed Failed image search provider calls
# TYPE search_calls_failed counter
search_calls_failed {{}} {}

# HELP generation_calls_total Total generation provider calls
# TYPE generation_calls_total counter
generation_calls_total {{}} {}

# HELP generation_calls_failed Failed generation provider calls
# TYPE generation_calls_failed counter
generation_calls_failed {{}} {}

# HELP generation_rate_limit_hits_total Rate-limit responses from the generation provider
# TYPE generation_rate_limit_hits_total counter
generation_rate_limit_hits_total {{}} {}

# HELP provider_latency_avg_ms Average outbound provider latency in milliseconds
# TYPE provider_latency_avg_ms gauge
provider_latency_avg_ms {{}} {}

# HELP cache_hit_rate Image cache hit rate (0.0 to 1.0)
# TYPE cache_hit_rate gauge
cache_hit_rate {{}} {}

# HELP images_stored_total Images written through to storage
# TYPE images_stored_total counter
images_stored_total {{}} {}

# HELP store_dedup_hits_total Store calls answered by an existing content hash
# TYPE store_dedup_hits_total counter
store_dedup_hits_total {{}} {}

# HELP items_resolved_total Items resolved, by claiming source
# TYPE items_resolved_total counter
items_resolved_total {{source="cached"}} {}
items_resolved_total {{source="semantic"}} {}
items_resolved_total {{source="search"}} {}
items_resolved_total {{source="generated"}} {}
items_resolved_total {{source="fallback"}} {}

# HELP stage_avg_duration_ms Average stage duration in milliseconds
# TYPE stage_avg_duration_ms gauge
stage_avg_duration_ms {{stage="cache"}} {}
stage_avg_duration_ms {{stage="semantic"}} {}
stage_avg_duration_ms {{stage="search"}} {}
stage_avg_duration_ms {{stage="generation"}} {}

# HELP menus_processed_total Total menus resolved
# TYPE menus_processed_total counter
menus_processed_total {{}} {}

# HELP items_processed_total Total menu items resolved
# TYPE items_processed_total counter
items_processed_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            s.search_calls_total,
            s.search_calls_failed,
            s.generation_calls_total,
            s.generation_calls_failed,
            s.generation_rate_limit_hits,
            s.provider_latency_avg_ms,
            s.cache_hit_rate,
            s.images_stored,
            s.store_dedup_hits,
            s.resolved_cached,
            s.resolved_semantic,
            s.resolved_search,
            s.resolved_generated,
            s.resolved_fallback,
            s.cache_stage_avg_ms,
            s.semantic_stage_avg_ms,
            s.search_stage_avg_ms,
            s.generation_stage_avg_ms,
            s.menus_processed,
            s.items_processed,
            s.uptime_seconds,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub search_calls_total: usize,
    pub search_calls_failed: usize,
    pub generation_calls_total: usize,
    pub generation_calls_failed: usize,
    pub generation_rate_limit_hits: usize,
    pub provider_latency_avg_ms: u64,
    pub provider_latency_p95_ms: u64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub images_stored: usize,
    pub store_dedup_hits: usize,
    pub resolved_cached: usize,
    pub resolved_semantic: usize,
    pub resolved_search: usize,
    pub resolved_generated: usize,
    pub resolved_fallback: usize,
    pub cache_stage_avg_ms: u64,
    pub semantic_stage_avg_ms: u64,
    pub search_stage_avg_ms: u64,
    pub generation_stage_avg_ms: u64,
    pub menus_processed: usize,
    pub items_processed: usize,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_search_call(true, Duration::from_millis(100));
        metrics.record_generation_call(false, Duration::from_millis(50));
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_resolution(ImageSource::Cached);
        metrics.record_resolution(ImageSource::Fallback);
        metrics.record_menu_processed(12);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.search_calls_total, 1);
        assert_eq!(snapshot.generation_calls_total, 1);
        assert_eq!(snapshot.generation_calls_failed, 1);
        assert_eq!(snapshot.cache_hit_rate, 0.5);
        assert_eq!(snapshot.resolved_cached, 1);
        assert_eq!(snapshot.resolved_fallback, 1);
        assert_eq!(snapshot.menus_processed, 1);
        assert_eq!(snapshot.items_processed, 12);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_search_call(true, Duration::from_millis(100));
        metrics.record_resolution(ImageSource::Search);

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("search_calls_total {} 1"));
        assert!(prometheus.contains(r#"items_resolved_total {source="search"} 1"#));
    }
}
