// Generative image fallback for items no search stage could resolve
//
// Every outbound call first claims a slot from the process-wide sliding
// window limiter, then retries on the provider-aware schedule. Generation
// is expected to be unreliable: exhausting the retry budget marks the item
// unresolved for this stage, never the whole pipeline. Successful images
// are written through the cache so repeat requests for the same dish never
// generate twice.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::{GenerationConfig, HttpConfig};
use crate::core::errors::{GenerationError, GenerationResult};
use crate::core::types::{ImageCandidate, ImageSource, MenuItemRequest};
use crate::middleware::backoff::{FailureKind, RetryPolicy};
use crate::middleware::rate_limiter::RateLimiter;
use crate::services::cache::ImageCacheService;
use crate::utils::Metrics;

/// Output of one provider call: a temporary URL or an inline payload.
#[derive(Debug, Clone)]
pub enum GeneratedImage {
    Url(String),
    Base64(String),
}

/// External generative image provider.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> GenerationResult<GeneratedImage>;
}

/// Deterministic photography-style prompt for a dish.
pub fn build_generation_prompt(name: &str, description: Option<&str>) -> String {
    let mut prompt = format!(
        "High-resolution, photorealistic image of {}, plated on a clean white plate, \
         viewed at a 45-degree angle under natural lighting, realistic background, \
         food magazine style",
        name
    );
    if let Some(description) = description {
        if !description.is_empty() {
            prompt.push_str(&format!(". The dish contains: {}", description));
        }
    }
    prompt
}

/// Image-generation REST client.
pub struct OpenAiImageClient {
    client: Client,
    api_key: String,
    model: String,
    image_size: String,
    quality: String,
}

impl OpenAiImageClient {
    pub fn new(config: &GenerationConfig, http: &HttpConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        let client = Client::builder()
            .timeout(http.generation_timeout)
            .connect_timeout(http.connect_timeout)
            .build()
            .ok()?;
        Some(Self {
            client,
            api_key,
            model: config.model.clone(),
            image_size: config.image_size.clone(),
            quality: config.quality.clone(),
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiImageClient {
    async fn generate(&self, prompt: &str) -> GenerationResult<GeneratedImage> {
        let response = self
            .client
            .post("https://api.openai.com/v1/images/generations")
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "size": self.image_size,
                "quality": self.quality,
                "n": 1,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = response.json().await?;
        let first = &payload["data"][0];
        if let Some(url) = first["url"].as_str() {
            return Ok(GeneratedImage::Url(url.to_string()));
        }
        if let Some(b64) = first["b64_json"].as_str() {
            return Ok(GeneratedImage::Base64(b64.to_string()));
        }
        Err(GenerationError::EmptyResponse)
    }
}

/// The generation stage plus the static placeholder backstop.
pub struct GenerativeFallback {
    provider: Option<Arc<dyn GenerationProvider>>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    cache: Arc<ImageCacheService>,
    placeholder_url: String,
    metrics: Option<Metrics>,
}

impl GenerativeFallback {
    pub fn new(
        provider: Option<Arc<dyn GenerationProvider>>,
        limiter: RateLimiter,
        policy: RetryPolicy,
        cache: Arc<ImageCacheService>,
        placeholder_url: String,
        metrics: Option<Metrics>,
    ) -> Self {
        if provider.is_none() {
            // Stage-level skip, reported once instead of per item
            warn!("Generation provider not configured, generation stage disabled");
        }
        Self {
            provider,
            limiter,
            policy,
            cache,
            placeholder_url,
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Generate, store and return an image for one dish.
    ///
    /// None means the stage gave up on this item; the caller falls back to
    /// the placeholder.
    #[instrument(skip(self, description))]
    pub async fn generate_image(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Option<ImageCandidate> {
        let provider = self.provider.as_ref()?;
        let prompt = build_generation_prompt(name, description);
        debug!("Generation prompt: {}", prompt);

        let mut attempt: u32 = 0;
        loop {
            // Every call claims a global slot first, throttling throughput
            // across all tasks
            self.limiter.acquire().await;

            let start = Instant::now();
            let result = provider.generate(&prompt).await;

            match result {
                Ok(generated) => {
                    if let Some(ref m) = self.metrics {
                        m.record_generation_call(true, start.elapsed());
                    }
                    info!("Generated image for '{}', storing...", name);
                    return self.store_generated(generated, name, description).await;
                }
                Err(e) => {
                    if let Some(ref m) = self.metrics {
                        m.record_generation_call(false, start.elapsed());
                    }

                    let kind = if e.is_rate_limit() {
                        if let Some(ref m) = self.metrics {
                            m.record_rate_limit_hit();
                        }
                        FailureKind::RateLimit
                    } else if e.is_transient() {
                        FailureKind::Transient
                    } else {
                        FailureKind::Fatal
                    };

                    warn!(
                        "Generation for '{}' failed (attempt {}, {:?}): {}",
                        name,
                        attempt + 1,
                        kind,
                        e
                    );

                    if !self.policy.wait(kind, attempt).await {
                        error!("Giving up on generation for '{}'", name);
                        return None;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn store_generated(
        &self,
        generated: GeneratedImage,
        name: &str,
        description: Option<&str>,
    ) -> Option<ImageCandidate> {
        let stored = match generated {
            GeneratedImage::Url(url) => self.cache.store_image(&url, name, description).await,
            GeneratedImage::Base64(b64) => match general_purpose::STANDARD.decode(b64) {
                Ok(bytes) => {
                    self.cache
                        .store_image_bytes(bytes, "generated", name, description)
                        .await
                }
                Err(e) => {
                    error!("Generated payload for '{}' is not valid base64: {}", name, e);
                    return None;
                }
            },
        };

        match stored {
            Ok(url) => Some(ImageCandidate::new(url, ImageSource::Generated)),
            Err(e) => {
                error!("Failed to store generated image for '{}': {}", name, e);
                None
            }
        }
    }

    /// Generate images for many items concurrently; absent entries mean the
    /// stage gave up on that item.
    pub async fn generate_batch(
        self: &Arc<Self>,
        items: &[MenuItemRequest],
    ) -> HashMap<String, ImageCandidate> {
        let tasks: Vec<_> = items
            .iter()
            .map(|item| {
                let fallback = Arc::clone(self);
                let item = item.clone();
                let handle = tokio::spawn(async move {
                    fallback
                        .generate_image(&item.name, item.description.as_deref())
                        .await
                });
                (item.id.clone(), handle)
            })
            .collect();

        let mut map = HashMap::new();
        for (id, handle) in tasks {
            match handle.await {
                Ok(Some(candidate)) => {
                    map.insert(id, candidate);
                }
                Ok(None) => {}
                Err(e) => error!("Generation task failed: {}", e),
            }
        }
        map
    }

    /// The terminal fallback. Never fails.
    pub fn placeholder(&self) -> ImageCandidate {
        ImageCandidate::new(self.placeholder_url.clone(), ImageSource::Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CacheConfig;
    use crate::middleware::rate_limiter::RateLimiterConfig;
    use crate::services::cache::KeywordClassifier;
    use crate::services::storage::fakes::{MemoryMetadataStore, MemoryObjectStorage};
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::time::Duration;

    fn png_base64() -> String {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            256,
            256,
            image::Rgb([90, 150, 60]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        general_purpose::STANDARD.encode(bytes)
    }

    /// Fails with scripted errors before succeeding.
    struct ScriptedProvider {
        failures: Mutex<Vec<GenerationError>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(failures: Vec<GenerationError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        async fn generate(&self, _prompt: &str) -> GenerationResult<GeneratedImage> {
            *self.calls.lock() += 1;
            let mut failures = self.failures.lock();
            if failures.is_empty() {
                Ok(GeneratedImage::Base64(png_base64()))
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn fallback_with(
        provider: Option<Arc<dyn GenerationProvider>>,
        records: Arc<MemoryMetadataStore>,
        objects: Arc<MemoryObjectStorage>,
    ) -> Arc<GenerativeFallback> {
        let cache = Arc::new(ImageCacheService::new(
            objects,
            records,
            Arc::new(KeywordClassifier),
            &CacheConfig {
                bucket: "menu-images-cache".to_string(),
                max_image_width: 1920,
                jpeg_quality: 85,
                lookup_memo_entries: 16,
            },
            None,
        ));
        Arc::new(GenerativeFallback::new(
            provider,
            RateLimiter::new(RateLimiterConfig {
                max_requests: 100,
                window: Duration::from_secs(60),
            }),
            RetryPolicy::new(3),
            cache,
            "https://placeholder.test/unavailable.png".to_string(),
            None,
        ))
    }

    fn rate_limit_error() -> GenerationError {
        GenerationError::Provider {
            status: 429,
            body: "rate limit exceeded".to_string(),
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let a = build_generation_prompt("Pad Thai", Some("rice noodles, peanuts"));
        let b = build_generation_prompt("Pad Thai", Some("rice noodles, peanuts"));
        assert_eq!(a, b);
        assert!(a.contains("Pad Thai"));
        assert!(a.contains("rice noodles, peanuts"));
        assert!(a.contains("photorealistic"));
    }

    #[test]
    fn test_rate_limit_classification() {
        assert!(rate_limit_error().is_rate_limit());
        assert!(GenerationError::Provider {
            status: 400,
            body: "quota exhausted".to_string(),
        }
        .is_rate_limit());
        assert!(GenerationError::Provider {
            status: 503,
            body: "overloaded".to_string(),
        }
        .is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_rate_limit_backoffs() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            rate_limit_error(),
            rate_limit_error(),
        ]));
        let records = Arc::new(MemoryMetadataStore::default());
        let objects = Arc::new(MemoryObjectStorage::default());
        let fallback = fallback_with(
            Some(Arc::clone(&provider) as Arc<dyn GenerationProvider>),
            Arc::clone(&records),
            Arc::clone(&objects),
        );

        let started = tokio::time::Instant::now();
        let candidate = fallback.generate_image("Espresso", None).await.unwrap();

        // Two long backoff waits (10s + 20s) before the third attempt
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(*provider.calls.lock(), 3);
        assert_eq!(candidate.source, ImageSource::Generated);
        // The generated image was written through the cache
        assert_eq!(*records.insert_calls.lock(), 1);
        assert_eq!(*objects.upload_calls.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_ceiling() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            rate_limit_error(),
            rate_limit_error(),
            rate_limit_error(),
            rate_limit_error(),
            rate_limit_error(),
        ]));
        let fallback = fallback_with(
            Some(Arc::clone(&provider) as Arc<dyn GenerationProvider>),
            Arc::new(MemoryMetadataStore::default()),
            Arc::new(MemoryObjectStorage::default()),
        );

        let result = fallback.generate_image("Espresso", None).await;
        assert!(result.is_none());
        // Initial call plus three retries
        assert_eq!(*provider.calls.lock(), 4);
    }

    #[tokio::test]
    async fn test_fatal_error_fails_fast() {
        let provider = Arc::new(ScriptedProvider::new(vec![GenerationError::Provider {
            status: 400,
            body: "invalid prompt".to_string(),
        }]));
        let fallback = fallback_with(
            Some(Arc::clone(&provider) as Arc<dyn GenerationProvider>),
            Arc::new(MemoryMetadataStore::default()),
            Arc::new(MemoryObjectStorage::default()),
        );

        assert!(fallback.generate_image("Espresso", None).await.is_none());
        assert_eq!(*provider.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_placeholder_never_fails() {
        let fallback = fallback_with(
            None,
            Arc::new(MemoryMetadataStore::default()),
            Arc::new(MemoryObjectStorage::default()),
        );
        assert!(!fallback.is_enabled());
        assert!(fallback.generate_image("Espresso", None).await.is_none());

        let placeholder = fallback.placeholder();
        assert_eq!(placeholder.source, ImageSource::Fallback);
        assert_eq!(placeholder.url, "https://placeholder.test/unavailable.png");
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_generation_hits_content_dedup() {
        let records = Arc::new(MemoryMetadataStore::default());
        let objects = Arc::new(MemoryObjectStorage::default());
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let fallback = fallback_with(
            Some(provider as Arc<dyn GenerationProvider>),
            Arc::clone(&records),
            Arc::clone(&objects),
        );

        let first = fallback.generate_image("Espresso", None).await.unwrap();
        let second = fallback.generate_image("Espresso", None).await.unwrap();

        assert_eq!(first.url, second.url);
        // Identical bytes dedup to a single stored object
        assert_eq!(*objects.upload_calls.lock(), 1);
        assert_eq!(*records.insert_calls.lock(), 1);
    }
}
