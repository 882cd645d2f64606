use crate::core::errors::ConfigError;
use std::env;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Outbound HTTP configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub generation_timeout: Duration,
}

/// Web image search configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub engine_id: Option<String>,
    pub results_per_item: usize,
}

impl SearchConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.engine_id.is_some()
    }
}

/// Semantic matcher configuration
#[derive(Debug, Clone)]
pub struct SemanticConfig {
    pub enabled: bool,
    pub similarity_threshold: f32,
    pub top_k: usize,
}

/// Generation provider configuration
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub image_size: String,
    pub quality: String,
    pub max_retries: u32,
}

impl GenerationConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Storage backend configuration (object store + metadata tables)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl StorageConfig {
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }
}

/// Image cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub bucket: String,
    pub max_image_width: u32,
    pub jpeg_quality: u8,
    pub lookup_memo_entries: usize,
}

/// Generation rate limiting configuration (process-wide sliding window)
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent_items: usize,
    pub images_per_item: usize,
    pub placeholder_url: String,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub http: HttpConfig,
    pub search: SearchConfig,
    pub semantic: SemanticConfig,
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        // Parse log level
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        Ok(Self {
            server: ServerConfig {
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8000),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            http: HttpConfig {
                connect_timeout: Duration::from_secs(
                    env::var("HTTP_CONNECT_TIMEOUT_SECONDS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(10),
                ),
                request_timeout: Duration::from_secs(
                    env::var("HTTP_TIMEOUT_SECONDS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(30),
                ),
                generation_timeout: Duration::from_secs(
                    env::var("GENERATION_TIMEOUT_SECONDS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(60),
                ),
            },
            search: SearchConfig {
                api_key: env::var("SEARCH_API_KEY")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                engine_id: env::var("SEARCH_ENGINE_ID")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                results_per_item: env::var("SEARCH_RESULTS_PER_ITEM")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
            },
            semantic: SemanticConfig {
                enabled: env::var("SEMANTIC_SEARCH_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(true),
                similarity_threshold: env::var("SEMANTIC_SIMILARITY_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.7),
                top_k: env::var("SEMANTIC_TOP_K")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
            },
            generation: GenerationConfig {
                api_key: env::var("GENERATION_API_KEY")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                model: env::var("GENERATION_MODEL").unwrap_or_else(|_| "dall-e-3".to_string()),
                image_size: env::var("GENERATION_IMAGE_SIZE")
                    .unwrap_or_else(|_| "1024x1024".to_string()),
                quality: env::var("GENERATION_QUALITY").unwrap_or_else(|_| "standard".to_string()),
                max_retries: env::var("GENERATION_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
            },
            storage: StorageConfig {
                base_url: env::var("STORAGE_BASE_URL")
                    .ok()
                    .map(|s| s.trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty()),
                api_key: env::var("STORAGE_API_KEY")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            },
            cache: CacheConfig {
                bucket: env::var("CACHE_BUCKET")
                    .unwrap_or_else(|_| "menu-images-cache".to_string()),
                max_image_width: env::var("CACHE_MAX_IMAGE_WIDTH")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1920),
                jpeg_quality: env::var("CACHE_JPEG_QUALITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(85),
                lookup_memo_entries: env::var("CACHE_LOOKUP_MEMO_ENTRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(512),
            },
            rate_limit: RateLimitConfig {
                max_requests: env::var("GENERATION_RATE_LIMIT_MAX_REQUESTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
                window_seconds: env::var("GENERATION_RATE_LIMIT_WINDOW_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            },
            pipeline: PipelineConfig {
                max_concurrent_items: env::var("MAX_CONCURRENT_ITEMS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| std::cmp::max(num_cpus::get(), 8)),
                images_per_item: env::var("IMAGES_PER_ITEM")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
                placeholder_url: env::var("PLACEHOLDER_IMAGE_URL").unwrap_or_else(|_| {
                    "https://via.placeholder.com/1024x1024.png?text=Image+Not+Available"
                        .to_string()
                }),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.semantic.similarity_threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(
                self.semantic.similarity_threshold,
            ));
        }

        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::InvalidRateLimitCap);
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigError::InvalidRateLimitWindow);
        }

        if self.search.results_per_item == 0 {
            return Err(ConfigError::InvalidSearchConfig(
                "SEARCH_RESULTS_PER_ITEM must be > 0".to_string(),
            ));
        }

        if self.cache.bucket.is_empty() {
            return Err(ConfigError::InvalidCacheConfig(
                "CACHE_BUCKET must not be empty".to_string(),
            ));
        }
        if !(1..=100).contains(&self.cache.jpeg_quality) {
            return Err(ConfigError::InvalidCacheConfig(format!(
                "CACHE_JPEG_QUALITY must be between 1 and 100, got {}",
                self.cache.jpeg_quality
            )));
        }
        if self.cache.max_image_width < 200 {
            return Err(ConfigError::InvalidCacheConfig(format!(
                "CACHE_MAX_IMAGE_WIDTH must be >= 200, got {}",
                self.cache.max_image_width
            )));
        }

        Ok(())
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }
}

// Note: No Default implementation because Config::new() can fail
// Users should explicitly call Config::new()? and handle errors
