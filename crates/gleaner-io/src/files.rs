//! Reading and writing single label files and images.

use std::fs;
use std::path::Path;

use gleaner_export::{Manifest, parse_manifest, to_manifest};
use gleaner_pipeline::codec::{format_label_file, parse_label_file};
use gleaner_pipeline::raster::{decode_rgb, encode_rgb, format_for_extension};
use gleaner_pipeline::{LabelFile, RgbImage};

use crate::error::IoError;

/// Read and parse a label file. Malformed lines are kept verbatim.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the file cannot be read.
pub fn read_label_file(path: &Path) -> Result<LabelFile, IoError> {
    let text = fs::read_to_string(path).map_err(IoError::at(path))?;
    Ok(parse_label_file(&text))
}

/// Write a label file, replacing any existing one.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the file cannot be written.
pub fn write_label_file(path: &Path, file: &LabelFile) -> Result<(), IoError> {
    fs::write(path, format_label_file(file)).map_err(IoError::at(path))
}

/// Read and decode an image.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the file cannot be read and
/// [`IoError::Image`] if it cannot be decoded.
pub fn read_image(path: &Path) -> Result<RgbImage, IoError> {
    let bytes = fs::read(path).map_err(IoError::at(path))?;
    decode_rgb(&bytes).map_err(|source| IoError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Encode an image in the format named by the path's extension (PNG
/// when unrecognized) and write it.
///
/// # Errors
///
/// Returns [`IoError::Image`] if encoding fails and [`IoError::Io`] if
/// the file cannot be written.
pub fn write_image(path: &Path, image: &RgbImage) -> Result<(), IoError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("png");
    let bytes = encode_rgb(image, format_for_extension(ext)).map_err(|source| IoError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes).map_err(IoError::at(path))
}

/// Read and parse a dataset manifest.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the file cannot be read and
/// [`IoError::Manifest`] if it does not parse.
pub fn read_manifest(path: &Path) -> Result<Manifest, IoError> {
    let text = fs::read_to_string(path).map_err(IoError::at(path))?;
    parse_manifest(&text).map_err(|source| IoError::Manifest {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a dataset manifest, replacing any existing one.
///
/// # Errors
///
/// Returns [`IoError::Manifest`] if the manifest cannot be encoded and
/// [`IoError::Io`] if the file cannot be written.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<(), IoError> {
    let text = to_manifest(manifest).map_err(|source| IoError::Manifest {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(IoError::at(path))
}
