use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use thiserror::Error;

/// Longest side the provider accepts; larger images are downscaled.
pub const MAX_DIMENSION: u32 = 2048;

/// An image normalized for the provider: RGB, alpha flattened onto white,
/// longest side within [`MAX_DIMENSION`], re-encoded as PNG.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl PreparedImage {
    pub fn mime_type(&self) -> &'static str {
        "image/png"
    }
}

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("could not encode prepared image: {0}")]
    Encode(String),

    #[error("image preparation was aborted: {0}")]
    Aborted(String),
}

/// Decodes, normalizes, and (if needed) downscales an image.
///
/// Decoding and resampling are CPU-bound, so the work runs on the blocking
/// pool rather than the I/O loop.
pub async fn prepare_image(bytes: Vec<u8>) -> Result<PreparedImage, PrepareError> {
    tokio::task::spawn_blocking(move || prepare_blocking(&bytes))
        .await
        .map_err(|err| PrepareError::Aborted(err.to_string()))?
}

fn prepare_blocking(bytes: &[u8]) -> Result<PreparedImage, PrepareError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|err| PrepareError::Decode(err.to_string()))?;

    let flattened = flatten_to_rgb(decoded);
    let (width, height) = (flattened.width(), flattened.height());

    let normalized = if width.max(height) > MAX_DIMENSION {
        let resized = DynamicImage::ImageRgb8(flattened).resize(
            MAX_DIMENSION,
            MAX_DIMENSION,
            FilterType::Lanczos3,
        );
        tracing::debug!(
            from_width = width,
            from_height = height,
            width = resized.width(),
            height = resized.height(),
            "downscaled oversized image"
        );
        resized
    } else {
        DynamicImage::ImageRgb8(flattened)
    };

    let mut data = Vec::new();
    normalized
        .write_to(&mut std::io::Cursor::new(&mut data), ImageFormat::Png)
        .map_err(|err| PrepareError::Encode(err.to_string()))?;

    Ok(PreparedImage {
        data,
        width: normalized.width(),
        height: normalized.height(),
    })
}

/// Composites any alpha (RGBA, paletted, gray+alpha) over a white background.
fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => {
            let rgba = other.to_rgba8();
            let mut rgb = RgbImage::new(rgba.width(), rgba.height());
            for (x, y, pixel) in rgba.enumerate_pixels() {
                let [r, g, b, a] = pixel.0;
                let alpha = a as u32;
                let blend = |c: u8| (((c as u32) * alpha + 255 * (255 - alpha)) / 255) as u8;
                rgb.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
            }
            rgb
        }
    }
}
