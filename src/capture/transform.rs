//! Optional downsampling plus JPEG/base64 encoding.

use std::io::Cursor;

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Resize every image to exactly `(width, height)` before encoding.
    pub downsample: Option<(u32, u32)>,
}

/// Resize if configured; otherwise return the image untouched.
pub fn downsample(image: DynamicImage, options: &TransformOptions) -> DynamicImage {
    match options.downsample {
        Some((width, height)) if (image.width(), image.height()) != (width, height) => {
            image.resize_exact(width, height, FilterType::Triangle)
        }
        _ => image,
    }
}

/// Encode as base64 JPEG. Alpha is dropped; JPEG has no use for it.
pub fn encode(image: DynamicImage, options: &TransformOptions) -> Result<String> {
    let image = downsample(image, options);
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());

    let mut buffer = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .context("failed to encode capture as JPEG")?;

    Ok(general_purpose::STANDARD.encode(buffer))
}
