pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{content_hash, normalize_image_async, validate_image_bytes_async, NormalizedImage};
pub use metrics::Metrics;
