//! Image normalization for network transmission
//!
//! Turns a raw picked or captured image into a bounded-size JPEG ready to be
//! sent to the inspection service. Width is capped aspect-preserving and the
//! result is re-encoded lossily so payload size stays predictable regardless
//! of what the camera produced.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::info;

/// Maximum width of a normalized image in pixels (aspect-preserving)
pub(crate) const MAX_WIDTH: u32 = 1024;

/// JPEG quality for the normalized encoding
const JPEG_QUALITY: u8 = 80;

/// A normalized image asset ready for upload
#[derive(Debug, Clone)]
pub(crate) struct NormalizedImage {
    /// JPEG-encoded bytes, width capped at [`MAX_WIDTH`]
    pub(crate) bytes: Vec<u8>,
    /// Locally-displayable reference to the original source
    pub(crate) display_path: Option<PathBuf>,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// Normalize an image from a file on disk (camera roll or library pick)
pub(crate) fn normalize_file(path: &Path) -> Result<NormalizedImage, MediaError> {
    let img = ImageReader::open(path)
        .map_err(MediaError::Read)?
        .with_guessed_format()
        .map_err(MediaError::Read)?
        .decode()
        .map_err(MediaError::Decode)?;

    normalize(img, Some(path.to_path_buf()))
}

/// Normalize an image from raw bytes (dropped file or in-memory capture)
pub(crate) fn normalize_bytes(bytes: &[u8]) -> Result<NormalizedImage, MediaError> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(MediaError::Read)?
        .decode()
        .map_err(MediaError::Decode)?;

    normalize(img, None)
}

fn normalize(img: DynamicImage, display_path: Option<PathBuf>) -> Result<NormalizedImage, MediaError> {
    let (orig_w, orig_h) = (img.width(), img.height());

    let img = if orig_w > MAX_WIDTH {
        let target_h = ((orig_h as u64 * MAX_WIDTH as u64) / orig_w as u64).max(1) as u32;
        img.resize_exact(MAX_WIDTH, target_h, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let (width, height) = (img.width(), img.height());

    // JPEG has no alpha channel
    let rgb = img.into_rgb8();

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    rgb.write_with_encoder(encoder).map_err(MediaError::Encode)?;
    let bytes = buf.into_inner();

    info!(
        "Normalized image: {}x{} -> {}x{} ({} bytes)",
        orig_w,
        orig_h,
        width,
        height,
        bytes.len()
    );

    Ok(NormalizedImage {
        bytes,
        display_path,
        width,
        height,
    })
}

/// Image normalization errors
#[derive(Debug, thiserror::Error)]
pub(crate) enum MediaError {
    #[error("failed to read image: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}
