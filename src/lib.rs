// Library exports for the menu image-resolution pipeline

// Core modules
pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{ConfigError, GenerationError, PipelineError, ProgressError, SearchError, StorageError},
    types::{
        ImageCandidate, ImageSource, MenuItemRequest, ResolutionSummary, ResolvedImages,
        SimilarDish,
    },
};

pub use middleware::{FailureKind, RateLimiter, RateLimiterConfig, RetryPolicy};

pub use orchestration::ImageResolver;

pub use services::{
    GenerativeFallback, ImageCacheService, KeywordClassifier, ProgressSnapshot, ProgressStatus,
    ProgressTracker, SemanticMatcher, WebImageSearcher,
};

pub use utils::Metrics;
