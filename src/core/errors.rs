// Custom error types for better error handling and debugging
//
// Using thiserror for ergonomic error definitions with:
// - Context preservation
// - Type-safe error matching
// - Source error chaining

use thiserror::Error;

/// Storage layer errors (object store + metadata rows)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload rejected for {path}: {status} - {body}")]
    UploadRejected {
        path: String,
        status: u16,
        body: String,
    },

    #[error("Metadata query failed: {0}")]
    QueryFailed(String),

    #[error("Image decoding failed: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("Downloaded object is not a usable image: {reason}")]
    InvalidImage { reason: String },
}

/// Web image search errors
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search provider not configured (set SEARCH_API_KEY and SEARCH_ENGINE_ID)")]
    NotConfigured,

    #[error("Search request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Generation provider errors
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation provider not configured (set GENERATION_API_KEY)")]
    NotConfigured,

    #[error("Provider rate limit hit (attempt {attempt})")]
    RateLimited { attempt: u32 },

    #[error("Provider request failed: {status} - {body}")]
    Provider { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned no image data")]
    EmptyResponse,

    #[error("Generated image could not be stored: {0}")]
    StoreFailed(#[from] StorageError),
}

impl GenerationError {
    /// Rate-limit signals get the long provider-aware backoff schedule.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            GenerationError::RateLimited { .. } => true,
            GenerationError::Provider { status, body } => {
                *status == 429
                    || body.contains("rate limit")
                    || body.contains("rate_limit")
                    || body.contains("quota")
            }
            _ => false,
        }
    }

    /// Timeouts, connection errors and 5xx are retried on the short schedule.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Http(e) => e.is_timeout() || e.is_connect(),
            GenerationError::Provider { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Progress tracker errors
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Task {0} is already being tracked")]
    AlreadyTracking(String),
}

/// Pipeline orchestration errors
///
/// Only task-setup failures surface to the caller; everything downstream
/// degrades to the placeholder instead of failing the request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to start progress tracking: {0}")]
    TrackingFailed(#[from] ProgressError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Similarity threshold must be in [0.0, 1.0], got {0}")]
    InvalidSimilarityThreshold(f32),

    #[error("Rate limit cap must be > 0 when the generation stage is enabled")]
    InvalidRateLimitCap,

    #[error("Rate limit window must be > 0 seconds")]
    InvalidRateLimitWindow,

    #[error("Invalid search config: {0}")]
    InvalidSearchConfig(String),

    #[error("Invalid cache config: {0}")]
    InvalidCacheConfig(String),

    #[error("Environment variable parsing failed: {0}")]
    EnvVarError(String),
}

// Convenience type aliases for Results
pub type StorageResult<T> = Result<T, StorageError>;
pub type SearchApiResult<T> = Result<T, SearchError>;
pub type GenerationResult<T> = Result<T, GenerationError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
