pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ConfigError, GenerationError, PipelineError, ProgressError, SearchError, StorageError,
};
pub use types::{
    CachedImageRecord, ImageCandidate, ImageSource, MenuItemRequest, ResolutionSummary,
    ResolvedImages, SimilarDish,
};
