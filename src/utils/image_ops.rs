use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use xxhash_rust::xxh3::xxh3_64;

/// A cache-ready image: normalized bytes plus the metadata the cache layer
/// records alongside them.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub content_hash: String,
}

/// Content hash used as the storage dedup key.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:016x}", xxh3_64(bytes))
}

/// Asynchronously normalize raw image bytes for storage using
/// spawn_blocking to avoid blocking the async runtime.
///
/// Decoding, alpha flattening, resizing and JPEG encoding are CPU-intensive
/// synchronous operations; running them on the blocking pool keeps
/// concurrent network suspensions moving.
///
/// Normalization: flatten any alpha channel onto a white background, cap
/// the width at `max_width` preserving aspect ratio, re-encode as JPEG at
/// `jpeg_quality`.
pub async fn normalize_image_async(
    raw: Vec<u8>,
    max_width: u32,
    jpeg_quality: u8,
) -> Result<NormalizedImage> {
    tokio::task::spawn_blocking(move || {
        let decoded = image::load_from_memory(&raw).context("Failed to decode image")?;
        let flattened = flatten_to_rgb(&decoded);

        let resized = if flattened.width() > max_width {
            let ratio = max_width as f32 / flattened.width() as f32;
            let new_height = (flattened.height() as f32 * ratio) as u32;
            image::imageops::resize(&flattened, max_width, new_height.max(1), FilterType::Lanczos3)
        } else {
            flattened
        };

        let (width, height) = resized.dimensions();

        let mut jpeg_bytes = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg_bytes, jpeg_quality);
        resized
            .write_with_encoder(encoder)
            .context("Failed to encode image as JPEG")?;

        let hash = content_hash(&jpeg_bytes);

        Ok(NormalizedImage {
            bytes: jpeg_bytes,
            width,
            height,
            content_hash: hash,
        })
    })
    .await
    .context("Failed to spawn blocking task for image normalization")?
}

/// Validate candidate image bytes: decodable, at least 200px on each side,
/// aspect ratio between 0.3 and 3.0.
pub async fn validate_image_bytes_async(raw: Vec<u8>) -> bool {
    tokio::task::spawn_blocking(move || match image::load_from_memory(&raw) {
        Ok(img) => {
            let (w, h) = (img.width(), img.height());
            if w < 200 || h < 200 {
                return false;
            }
            let aspect = w as f32 / h as f32;
            (0.3..=3.0).contains(&aspect)
        }
        Err(_) => false,
    })
    .await
    .unwrap_or(false)
}

/// Flatten an image onto a white background, producing opaque RGB.
fn flatten_to_rgb(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::new(w, h);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u16;
        let blend = |c: u8| -> u8 { ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8 };
        out.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([120, 40, 40, 128]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash(b"dish"), content_hash(b"dish"));
        assert_ne!(content_hash(b"dish"), content_hash(b"fish"));
    }

    #[tokio::test]
    async fn test_normalize_caps_width() {
        let raw = png_bytes(2400, 1200);
        let normalized = normalize_image_async(raw, 1920, 85).await.unwrap();
        assert_eq!(normalized.width, 1920);
        assert_eq!(normalized.height, 960);
        assert!(!normalized.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_normalize_is_deterministic() {
        let a = normalize_image_async(png_bytes(400, 300), 1920, 85)
            .await
            .unwrap();
        let b = normalize_image_async(png_bytes(400, 300), 1920, 85)
            .await
            .unwrap();
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[tokio::test]
    async fn test_validate_rejects_tiny_and_extreme() {
        assert!(!validate_image_bytes_async(png_bytes(100, 100)).await);
        assert!(!validate_image_bytes_async(png_bytes(2000, 200)).await);
        assert!(validate_image_bytes_async(png_bytes(640, 480)).await);
        assert!(!validate_image_bytes_async(b"not an image".to_vec()).await);
    }
}
