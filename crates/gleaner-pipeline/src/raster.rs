//! In-memory image decoding and encoding.
//!
//! Callers own the bytes; this module never touches the filesystem.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::types::{DatasetError, RgbImage};

/// File extensions recognized as images, lowercase.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Whether `ext` (any case, without the dot) names a supported image.
#[must_use]
pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

/// Encoder for a file extension; anything unrecognized is written as PNG.
#[must_use]
pub fn format_for_extension(ext: &str) -> ImageFormat {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        "bmp" => ImageFormat::Bmp,
        "webp" => ImageFormat::WebP,
        _ => ImageFormat::Png,
    }
}

/// Decode raw image bytes into an RGB raster.
///
/// # Errors
///
/// Returns [`DatasetError::EmptyInput`] if `bytes` is empty.
/// Returns [`DatasetError::ImageDecode`] if the data is not a readable image.
#[must_use = "returns the decoded image"]
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, DatasetError> {
    if bytes.is_empty() {
        return Err(DatasetError::EmptyInput);
    }
    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Encode an RGB raster in the given format.
///
/// # Errors
///
/// Returns [`DatasetError::ImageDecode`] if the encoder rejects the image.
pub fn encode_rgb(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, DatasetError> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone()).write_to(&mut out, format)?;
    Ok(out.into_inner())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(decode_rgb(&[]), Err(DatasetError::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_returns_image_decode_error() {
        let result = decode_rgb(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(DatasetError::ImageDecode(_))));
    }

    #[test]
    fn png_round_trip_is_lossless() {
        let img = RgbImage::from_fn(7, 5, |x, y| Rgb([u8::try_from(x).unwrap(), u8::try_from(y).unwrap(), 9]));
        let bytes = encode_rgb(&img, ImageFormat::Png).unwrap();
        assert_eq!(decode_rgb(&bytes).unwrap(), img);
    }

    #[test]
    fn extensions() {
        assert!(is_image_extension("JPG"));
        assert!(is_image_extension("bmp"));
        assert!(!is_image_extension("txt"));
        assert_eq!(format_for_extension("JPEG"), ImageFormat::Jpeg);
        assert!(is_image_extension("WebP"));
        assert_eq!(format_for_extension("webp"), ImageFormat::WebP);
        assert_eq!(format_for_extension("tiff"), ImageFormat::Png);
    }

    #[test]
    fn webp_is_written_losslessly() {
        let img = RgbImage::from_fn(6, 4, |x, y| Rgb([u8::try_from(x * 40).unwrap(), u8::try_from(y * 60).unwrap(), 17]));
        let bytes = encode_rgb(&img, format_for_extension("webp")).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::WebP);
        assert_eq!(decode_rgb(&bytes).unwrap(), img);
    }
}
