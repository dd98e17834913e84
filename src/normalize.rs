use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};

use crate::image_format::ImageFormat;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("decode {format} image")]
    Decode {
        format: ImageFormat,
        #[source]
        source: image::ImageError,
    },
    #[error("encode jpeg")]
    Encode(#[source] image::ImageError),
}

/// Returns JPEG bytes for an image of the given format.
///
/// JPEG input is returned untouched. Other formats are decoded (first frame
/// for GIF), flattened onto white, and re-encoded at `quality` (1..=100).
pub fn normalize(bytes: Vec<u8>, format: ImageFormat, quality: u8) -> Result<Vec<u8>, NormalizeError> {
    if format == ImageFormat::Jpeg {
        return Ok(bytes);
    }

    let decoded = image::load_from_memory_with_format(&bytes, format.codec())
        .map_err(|source| NormalizeError::Decode { format, source })?;
    let rgb = flatten_onto_white(decoded);

    let mut out = Cursor::new(Vec::with_capacity(bytes.len()));
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(&rgb).map_err(NormalizeError::Encode)?;
    Ok(out.into_inner())
}

fn flatten_onto_white(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.into_rgb8();
    }

    let rgba = image.into_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
        let alpha = u32::from(src[3]);
        for channel in 0..3 {
            let value = u32::from(src[channel]) * alpha + 255 * (255 - alpha);
            dst[channel] = (value / 255) as u8;
        }
    }
    rgb
}
