// Keyword image search against external search providers
//
// Queries are built from a normalized core term plus ranked modifiers,
// negative terms keep out non-food and stock imagery, and results are
// filtered for relevance and deduplicated before anything reaches the
// pipeline. New hits are cached in the background without blocking the
// caller.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::{HttpConfig, SearchConfig};
use crate::core::errors::SearchError;
use crate::core::types::{ImageCandidate, ImageSource, MenuItemRequest};
use crate::services::cache::ImageCacheService;
use crate::utils::Metrics;

/// High-quality food sites for better image results; the first five carry
/// the strict-pass site restriction.
const FOOD_DOMAINS: &[&str] = &[
    "wolt.com",
    "seriouseats.com",
    "bonappetit.com",
    "epicurious.com",
    "bbcgoodfood.com",
    "allrecipes.com",
    "foodnetwork.com",
    "tasteatlas.com",
    "justonecookbook.com",
    "thespruceeats.com",
    "foodgawker.com",
    "delish.com",
    "food52.com",
    "thekitchn.com",
    "simplyrecipes.com",
    "cookinglight.com",
    "eatingwell.com",
    "foodandwine.com",
    "saveur.com",
    "finecooking.com",
    "myrecipes.com",
    "ubereats.com",
    "doordash.com",
    "grubhub.com",
];

/// Terms to exclude for savory dishes
const NEGATIVE_SWEET_TERMS: &[&str] = &[
    "dessert", "tart", "pie", "cake", "brownie", "cookie", "pudding", "fruit", "sweet", "mousse",
    "cheesecake", "galette", "cobbler", "pastry", "cupcake", "donut", "muffin",
];

/// Generic negative terms to avoid stock photos and non-food items
const NEGATIVE_GENERIC_TERMS: &[&str] = &[
    "logo", "vector", "illustration", "clipart", "packaging", "stock", "getty", "shutterstock",
    "alamy", "cartoon", "drawing", "menu", "text", "writing", "sign", "board", "blackboard",
    "face", "person", "people", "chef", "waiter", "customer", "restaurant interior", "kitchen",
    "dining room", "table setting", "cutlery", "napkin", "tablecloth", "candle", "flower", "vase",
    "book", "magazine", "flyer", "brochure", "poster", "advertisement",
];

/// Terms that often indicate non-food product imagery
const NEGATIVE_OBJECT_TERMS: &[&str] = &[
    "watch", "wristwatch", "smartwatch", "chronograph", "bracelet", "strap", "clock", "timepiece",
    "jewelry", "jewelery", "necklace", "earring", "earrings", "handbag", "purse", "backpack",
    "wallet", "shoe", "sneaker", "boot", "clothing", "apparel", "outfit", "garment", "fashion",
    "runway", "phone", "smartphone", "tablet", "laptop", "computer", "keyboard",
];

const SWEET_CORES: &[&str] = &["cake", "dessert", "ice", "chocolate", "cookie", "brownie"];

const MEASUREMENT_UNITS: &[&str] = &[
    "g", "kg", "oz", "ml", "l", "cm", "mm", "in", "inch", "€", "$", "£",
];

/// Normalize a raw menu item name into a core search term plus up to three
/// ranked modifier tokens.
pub fn normalize_query_term(raw_name: &str) -> (String, Vec<String>) {
    let cleaned: String = raw_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '_' | '-' | '(' | ')' | ',' | '/' | '{' | '}' => ' ',
            _ => c,
        })
        .collect();

    let tokens: Vec<String> = cleaned
        .split_whitespace()
        .filter(|t| !is_measurement(t))
        .map(str::to_string)
        .collect();

    let has = |w: &str| tokens.iter().any(|t| t == w);

    // Core term with category-aware synonym handling
    let core = if has("burger") || has("cheeseburger") || has("hamburger") {
        if has("cheese") || has("cheeseburger") {
            "cheeseburger"
        } else if has("hamburger") {
            "hamburger"
        } else {
            "burger"
        }
    } else if has("pizza") {
        "pizza"
    } else if has("pasta") || has("spaghetti") || has("penne") {
        "pasta"
    } else if has("salad") {
        "salad"
    } else if has("soup") {
        "soup"
    } else if has("sandwich") {
        "sandwich"
    } else {
        tokens.first().map(String::as_str).unwrap_or("food")
    }
    .to_string();

    // Protein and cooking-method keywords outrank toppings
    let priority = |t: &str| -> i32 {
        match t {
            "beef" | "chicken" | "pork" | "fish" | "seafood" => 3,
            "grilled" | "fried" | "baked" | "roasted" | "steamed" => 2,
            "cheese" => 2,
            "tomato" | "onion" | "lettuce" | "mushroom" => 1,
            _ => 0,
        }
    };

    let stop_words = ["with", "and", "the", "a", "an", "of", "in", "on"];
    let mut modifiers: Vec<String> = tokens
        .into_iter()
        .filter(|t| *t != core && !stop_words.contains(&t.as_str()))
        .collect();
    modifiers.sort_by_key(|t| std::cmp::Reverse(priority(t)));
    modifiers.truncate(3);

    (core, modifiers)
}

fn is_measurement(token: &str) -> bool {
    // Currency-prefixed prices ("$12") and unit-suffixed amounts ("250g")
    let stripped = token.trim_start_matches(['€', '$', '£']);
    if stripped.len() != token.len() {
        return stripped.chars().all(|c| c.is_ascii_digit() || c == '.');
    }
    if !token.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    let suffix: String = token
        .chars()
        .skip_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    suffix.is_empty() || MEASUREMENT_UNITS.contains(&suffix.as_str())
}

fn is_savory(core: &str) -> bool {
    !SWEET_CORES.iter().any(|sweet| core.contains(sweet))
}

/// Build the provider query: core + top modifiers + one description
/// keyword + food-photo context + negative terms.
pub fn build_search_query(
    core: &str,
    modifiers: &[String],
    description: Option<&str>,
    add_context: bool,
    use_negatives: bool,
) -> String {
    let mut parts: Vec<String> = vec![core.to_string()];
    parts.extend(modifiers.iter().take(2).cloned());

    if let Some(description) = description {
        let desc_lower = description.to_lowercase();
        for word in ["grilled", "fried", "baked", "roasted", "fresh", "creamy", "spicy"] {
            if desc_lower.contains(word) && !parts.iter().any(|p| p == word) {
                parts.push(word.to_string());
                break;
            }
        }
    }

    if add_context {
        parts.extend(
            ["\"restaurant\"", "\"plated\"", "\"food photography\"", "dish"]
                .iter()
                .map(|s| s.to_string()),
        );
    }

    if use_negatives {
        if is_savory(core) {
            for term in ["dessert", "cake", "sweet"] {
                parts.push(format!("-{}", term));
            }
        }

        let priority_negatives = [
            "-menu", "-text", "-face", "-person", "-chef", "-logo", "-cartoon", "-illustration",
        ];
        let mut negatives: Vec<String> =
            priority_negatives.iter().map(|s| s.to_string()).collect();

        let mut generic: Vec<&str> = NEGATIVE_GENERIC_TERMS
            .iter()
            .chain(NEGATIVE_OBJECT_TERMS.iter())
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        generic.sort_unstable();
        for term in generic {
            let token = if term.contains(' ') {
                format!("-\"{}\"", term)
            } else {
                format!("-{}", term)
            };
            if !negatives.contains(&token) {
                negatives.push(token);
            }
        }
        parts.extend(negatives);
    }

    parts.join(" ")
}

/// Canonical URL for deduplication: lowercased host + path, query stripped.
pub fn canonical_image_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => format!(
            "{}{}",
            parsed.host_str().unwrap_or_default().to_lowercase(),
            parsed.path().to_lowercase()
        ),
        Err(_) => url.to_string(),
    }
}

/// One raw result from a search provider.
#[derive(Debug, Clone, Default)]
pub struct RawSearchResult {
    pub title: String,
    pub snippet: String,
    pub link: String,
    pub context_link: String,
    pub display_link: String,
}

impl RawSearchResult {
    fn haystack(&self) -> String {
        format!(
            "{} {} {} {}",
            self.title.to_lowercase(),
            self.snippet.to_lowercase(),
            self.link.to_lowercase(),
            self.context_link.to_lowercase()
        )
    }
}

/// Check one raw result for relevance to the dish.
pub fn is_relevant_result(
    result: &RawSearchResult,
    core_keywords: &HashSet<String>,
    savory: bool,
) -> bool {
    let haystack = result.haystack();

    // Must mention at least one core keyword somewhere
    if !core_keywords.iter().any(|k| haystack.contains(k.as_str())) {
        return false;
    }

    if savory && NEGATIVE_SWEET_TERMS.iter().any(|t| haystack.contains(t)) {
        return false;
    }

    if NEGATIVE_OBJECT_TERMS.iter().any(|t| haystack.contains(t)) {
        return false;
    }

    let unwanted = [
        "stock photo", "clipart", "vector", "menu", "price list", "restaurant sign",
        "chef portrait", "kitchen staff", "dining room", "table setting", "cutlery",
        "advertisement", "flyer", "brochure",
    ];
    if unwanted.iter().any(|t| haystack.contains(t)) {
        return false;
    }

    if ["face", "person", "people", "chef", "waiter"]
        .iter()
        .any(|t| haystack.contains(t))
    {
        return false;
    }

    true
}

/// External keyword image-search provider.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search_images(
        &self,
        query: &str,
        num: usize,
    ) -> Result<Vec<RawSearchResult>, SearchError>;
}

/// Custom-search REST client.
pub struct GoogleCseClient {
    client: Client,
    api_key: String,
    engine_id: String,
}

impl GoogleCseClient {
    pub fn new(config: &SearchConfig, http: &HttpConfig) -> Option<Self> {
        let (api_key, engine_id) = match (&config.api_key, &config.engine_id) {
            (Some(key), Some(id)) => (key.clone(), id.clone()),
            _ => return None,
        };
        let client = Client::builder()
            .timeout(http.request_timeout)
            .connect_timeout(http.connect_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .ok()?;
        Some(Self {
            client,
            api_key,
            engine_id,
        })
    }
}

#[async_trait]
impl SearchProvider for GoogleCseClient {
    async fn search_images(
        &self,
        query: &str,
        num: usize,
    ) -> Result<Vec<RawSearchResult>, SearchError> {
        let response = self
            .client
            .get("https://www.googleapis.com/customsearch/v1")
            .query(&[
                ("q", query),
                ("cx", &self.engine_id),
                ("key", &self.api_key),
                ("searchType", "image"),
                ("num", &std::cmp::min(num, 10).to_string()),
                ("safe", "active"),
                ("imgType", "photo"),
                ("imgSize", "LARGE"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::InvalidResponse(format!(
                "{} - {}",
                status, body
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;

        let items = payload["items"].as_array().cloned().unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|item| RawSearchResult {
                title: item["title"].as_str().unwrap_or_default().to_string(),
                snippet: item["snippet"].as_str().unwrap_or_default().to_string(),
                link: item["link"].as_str().unwrap_or_default().to_string(),
                context_link: item["image"]["contextLink"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                display_link: item["displayLink"].as_str().unwrap_or_default().to_string(),
            })
            .collect())
    }
}

/// The web search stage.
pub struct WebImageSearcher {
    provider: Option<Arc<dyn SearchProvider>>,
    cache: Arc<ImageCacheService>,
    metrics: Option<Metrics>,
}

impl WebImageSearcher {
    pub fn new(
        provider: Option<Arc<dyn SearchProvider>>,
        cache: Arc<ImageCacheService>,
        metrics: Option<Metrics>,
    ) -> Self {
        if provider.is_none() {
            // Stage-level skip, reported once instead of per item
            warn!("Image search provider not configured, search stage disabled");
        }
        Self {
            provider,
            cache,
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Search food images for one menu item.
    ///
    /// Serves cached hits first, then a strict provider pass restricted to
    /// reputable food domains, then a looser pass to fill the remainder.
    /// Newly found URLs are cached in the background.
    #[instrument(skip(self, description))]
    pub async fn search_images(
        &self,
        name: &str,
        description: Option<&str>,
        limit: usize,
    ) -> Vec<ImageCandidate> {
        let cached = self.cache.search_cached(name, description, limit).await;
        if cached.len() >= limit {
            info!("Serving {} cached images for '{}'", cached.len(), name);
            return cached
                .into_iter()
                .map(|url| ImageCandidate::new(url, ImageSource::Cached))
                .collect();
        }

        let Some(provider) = self.provider.as_ref() else {
            return cached
                .into_iter()
                .map(|url| ImageCandidate::new(url, ImageSource::Cached))
                .collect();
        };

        let search_limit = limit - cached.len();
        let (core, modifiers) = normalize_query_term(name);
        debug!(
            "Searching images for '{}' (core: {}, modifiers: {:?})",
            name, core, modifiers
        );

        let savory = is_savory(&core);
        let mut core_keywords: HashSet<String> = HashSet::from([core.clone()]);
        if core.contains("burger") {
            for k in ["burger", "hamburger", "cheeseburger"] {
                core_keywords.insert(k.to_string());
            }
        }
        core_keywords.extend(modifiers.iter().take(2).cloned());

        let mut seen_images: HashSet<String> = HashSet::new();
        let mut seen_pages: HashSet<String> = HashSet::new();
        let mut found: Vec<String> = Vec::new();

        // Strict pass: full query, restricted to the top food domains
        let site_restrict = FOOD_DOMAINS[..5]
            .iter()
            .map(|d| format!("site:{}", d))
            .collect::<Vec<_>>()
            .join(" OR ");
        let strict_query = format!(
            "{} ({})",
            build_search_query(&core, &modifiers, description, true, true),
            site_restrict
        );

        let start = Instant::now();
        match provider
            .search_images(&strict_query, std::cmp::min(search_limit * 2, 10))
            .await
        {
            Ok(results) => {
                if let Some(ref m) = self.metrics {
                    m.record_search_call(true, start.elapsed());
                }
                self.collect_results(
                    results,
                    &core_keywords,
                    savory,
                    search_limit,
                    false,
                    &core,
                    &mut seen_images,
                    &mut seen_pages,
                    &mut found,
                );
            }
            Err(e) => {
                if let Some(ref m) = self.metrics {
                    m.record_search_call(false, start.elapsed());
                }
                error!("Strict search failed for '{}': {}", name, e);
            }
        }

        // Loose pass: fewer modifiers, no domain restriction
        if found.len() < search_limit {
            let remaining = search_limit - found.len();
            let loose_query =
                build_search_query(&core, &modifiers[..modifiers.len().min(1)], description, false, false);
            let start = Instant::now();
            match provider
                .search_images(&loose_query, std::cmp::min(remaining * 2, 10))
                .await
            {
                Ok(results) => {
                    if let Some(ref m) = self.metrics {
                        m.record_search_call(true, start.elapsed());
                    }
                    let loose_keywords = HashSet::from([core.clone()]);
                    self.collect_results(
                        results,
                        &loose_keywords,
                        savory,
                        search_limit,
                        true,
                        &core,
                        &mut seen_images,
                        &mut seen_pages,
                        &mut found,
                    );
                }
                Err(e) => {
                    if let Some(ref m) = self.metrics {
                        m.record_search_call(false, start.elapsed());
                    }
                    error!("Loose search failed for '{}': {}", name, e);
                }
            }
        }

        info!("Found {} new images for '{}'", found.len(), name);

        // Cache the new hits without blocking the caller
        if !found.is_empty() {
            let cache = Arc::clone(&self.cache);
            let to_cache: Vec<(String, String, Option<String>)> = found
                .iter()
                .map(|url| (url.clone(), name.to_string(), description.map(str::to_string)))
                .collect();
            tokio::spawn(async move {
                cache.cache_images_batch(to_cache).await;
            });
        }

        let mut candidates: Vec<ImageCandidate> = cached
            .into_iter()
            .map(|url| ImageCandidate::new(url, ImageSource::Cached))
            .collect();
        candidates.extend(
            found
                .into_iter()
                .map(|url| ImageCandidate::new(url, ImageSource::Search)),
        );
        candidates.truncate(limit);
        candidates
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_results(
        &self,
        results: Vec<RawSearchResult>,
        core_keywords: &HashSet<String>,
        savory: bool,
        limit: usize,
        require_title_match_offsite: bool,
        core: &str,
        seen_images: &mut HashSet<String>,
        seen_pages: &mut HashSet<String>,
        found: &mut Vec<String>,
    ) {
        for result in results {
            if found.len() >= limit {
                break;
            }
            if result.link.is_empty() {
                continue;
            }

            let canonical = canonical_image_url(&result.link);
            if seen_images.contains(&canonical)
                || (!result.context_link.is_empty() && seen_pages.contains(&result.context_link))
            {
                continue;
            }

            if !is_relevant_result(&result, core_keywords, savory) {
                continue;
            }

            // Off-allowlist hosts in the loose pass need the core term in
            // the title
            if require_title_match_offsite {
                let display = result.display_link.to_lowercase();
                let on_allowlist = FOOD_DOMAINS.iter().any(|d| display.contains(d));
                if !on_allowlist && !result.title.to_lowercase().contains(core) {
                    continue;
                }
            }

            seen_images.insert(canonical);
            if !result.context_link.is_empty() {
                seen_pages.insert(result.context_link.clone());
            }
            debug!("Found image: {}", result.link);
            found.push(result.link);
        }
    }

    /// Search images for many items concurrently.
    ///
    /// Every item id is present in the returned map; a failed search yields
    /// an empty list for that item without failing the batch.
    pub async fn search_images_batch(
        self: &Arc<Self>,
        items: &[MenuItemRequest],
        limit_per_item: usize,
    ) -> HashMap<String, Vec<ImageCandidate>> {
        let tasks: Vec<_> = items
            .iter()
            .map(|item| {
                let searcher = Arc::clone(self);
                let item = item.clone();
                let id = item.id.clone();
                let name = item.name.clone();
                let handle = tokio::spawn(async move {
                    searcher
                        .search_images(&item.name, item.description.as_deref(), limit_per_item)
                        .await
                });
                (id, name, handle)
            })
            .collect();

        let mut map = HashMap::new();
        for (id, name, handle) in tasks {
            let candidates = match handle.await {
                Ok(candidates) => candidates,
                Err(e) => {
                    error!("Image search task for '{}' failed: {}", name, e);
                    Vec::new()
                }
            };
            if candidates.is_empty() {
                warn!("No images found for item: {}", name);
            }
            map.insert(id, candidates);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CacheConfig;
    use crate::services::cache::KeywordClassifier;
    use crate::services::storage::fakes::{MemoryMetadataStore, MemoryObjectStorage};

    fn cache_service() -> Arc<ImageCacheService> {
        Arc::new(ImageCacheService::new(
            Arc::new(MemoryObjectStorage::default()),
            Arc::new(MemoryMetadataStore::default()),
            Arc::new(KeywordClassifier),
            &CacheConfig {
                bucket: "menu-images-cache".to_string(),
                max_image_width: 1920,
                jpeg_quality: 85,
                lookup_memo_entries: 16,
            },
            None,
        ))
    }

    fn result(title: &str, link: &str) -> RawSearchResult {
        RawSearchResult {
            title: title.to_string(),
            snippet: String::new(),
            link: link.to_string(),
            context_link: format!("{}/page", link),
            display_link: "seriouseats.com".to_string(),
        }
    }

    struct FixedProvider {
        results: Vec<RawSearchResult>,
    }

    #[async_trait]
    impl SearchProvider for FixedProvider {
        async fn search_images(
            &self,
            _query: &str,
            _num: usize,
        ) -> Result<Vec<RawSearchResult>, SearchError> {
            Ok(self.results.clone())
        }
    }

    /// Fails for any query containing the poison term.
    struct FlakyProvider {
        poison: String,
        results: Vec<RawSearchResult>,
    }

    #[async_trait]
    impl SearchProvider for FlakyProvider {
        async fn search_images(
            &self,
            query: &str,
            _num: usize,
        ) -> Result<Vec<RawSearchResult>, SearchError> {
            if query.contains(&self.poison) {
                return Err(SearchError::InvalidResponse("boom".to_string()));
            }
            Ok(self.results.clone())
        }
    }

    #[test]
    fn test_normalize_collapses_burger_synonyms() {
        let (core, _) = normalize_query_term("Classic Cheese Burger");
        assert_eq!(core, "cheeseburger");
        let (core, _) = normalize_query_term("Hamburger Royale");
        assert_eq!(core, "hamburger");
        let (core, _) = normalize_query_term("BBQ Burger");
        assert_eq!(core, "burger");
    }

    #[test]
    fn test_normalize_strips_measurements() {
        let (core, modifiers) = normalize_query_term("Grilled Chicken 250g $12");
        assert_eq!(core, "grilled");
        assert!(modifiers.contains(&"chicken".to_string()));
        assert!(!modifiers.iter().any(|m| m.contains("250") || m.contains("12")));
    }

    #[test]
    fn test_modifiers_ranked_by_priority() {
        let (_, modifiers) = normalize_query_term("spicy beef noodles with lettuce");
        // Protein outranks toppings
        assert_eq!(modifiers[0], "beef");
    }

    #[test]
    fn test_query_negatives_for_savory_only() {
        let savory = build_search_query("burger", &[], None, false, true);
        assert!(savory.contains("-dessert"));
        let sweet = build_search_query("cake", &[], None, false, true);
        assert!(!sweet.contains("-dessert"));
        assert!(sweet.contains("-menu"));
    }

    #[test]
    fn test_query_picks_description_keyword() {
        let query = build_search_query(
            "salad",
            &[],
            Some("Fresh greens with grilled halloumi"),
            false,
            false,
        );
        assert!(query.contains("grilled"));
    }

    #[test]
    fn test_canonical_url_strips_query_and_case() {
        assert_eq!(
            canonical_image_url("https://CDN.Example.com/Food/Pic.jpg?width=800"),
            "cdn.example.com/food/pic.jpg"
        );
    }

    #[test]
    fn test_relevance_rejects_sweet_for_savory() {
        let keywords = HashSet::from(["burger".to_string()]);
        let ok = result("juicy burger closeup", "https://a/burger.jpg");
        assert!(is_relevant_result(&ok, &keywords, true));

        let sweet = result("burger shaped cake", "https://a/cake.jpg");
        assert!(!is_relevant_result(&sweet, &keywords, true));

        let offtopic = result("sunset over the bay", "https://a/bay.jpg");
        assert!(!is_relevant_result(&offtopic, &keywords, true));

        let object = result("burger wristwatch for sale", "https://a/watch.jpg");
        assert!(!is_relevant_result(&object, &keywords, true));
    }

    #[tokio::test]
    async fn test_search_filters_and_dedups() {
        let provider = Arc::new(FixedProvider {
            results: vec![
                result("margherita pizza plated", "https://a/pizza1.jpg"),
                // Same canonical URL with a different query string
                result("margherita pizza plated", "https://a/pizza1.jpg?w=400"),
                result("pizza chef portrait", "https://a/chef.jpg"),
                result("margherita pizza oven", "https://a/pizza2.jpg"),
            ],
        });
        let searcher = Arc::new(WebImageSearcher::new(
            Some(provider),
            cache_service(),
            None,
        ));

        let candidates = searcher.search_images("Margherita Pizza", None, 2).await;
        let urls: Vec<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a/pizza1.jpg", "https://a/pizza2.jpg"]);
        assert!(candidates.iter().all(|c| c.source == ImageSource::Search));
    }

    #[tokio::test]
    async fn test_batch_failure_is_isolated() {
        let provider = Arc::new(FlakyProvider {
            poison: "espresso".to_string(),
            results: vec![result("margherita pizza plated", "https://a/pizza1.jpg")],
        });
        let searcher = Arc::new(WebImageSearcher::new(
            Some(provider),
            cache_service(),
            None,
        ));

        let items = vec![
            MenuItemRequest::new("1", "Margherita Pizza"),
            MenuItemRequest::new("2", "Espresso"),
        ];
        let map = searcher.search_images_batch(&items, 2).await;

        // The failing item still gets an entry, the healthy one gets results
        assert_eq!(map.len(), 2);
        assert!(!map["1"].is_empty());
        assert!(map["2"].is_empty());
    }

    #[tokio::test]
    async fn test_disabled_without_provider() {
        let searcher = Arc::new(WebImageSearcher::new(None, cache_service(), None));
        assert!(!searcher.is_enabled());
        assert!(searcher.search_images("Pizza", None, 2).await.is_empty());
    }
}
