//! Image format handling for the image store.
//!
//! Uploads are accepted as PNG or JPEG and normalized to PNG on disk, so
//! everything reading from the store only ever deals with one encoding.

use std::io::Cursor;
use std::path::Path;

use image::ImageFormat;

/// File extensions accepted by the upload flow.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Mime types accepted by content sniffing.
const ALLOWED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg"];

/// Extension used for every file written to the image store.
pub const STORED_EXTENSION: &str = "png";

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Check a client-supplied file name against the extension allow-list.
pub fn is_allowed_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Check if data starts with the PNG signature
pub fn is_png(data: &[u8]) -> bool {
    data.len() >= 8 && data[0..8] == *b"\x89PNG\r\n\x1a\n"
}

/// Detect mime type from magic bytes
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    infer::get(data).map(|kind| kind.mime_type())
}

/// Normalize an uploaded image to PNG.
///
/// Content is sniffed rather than trusted from the file name; anything that
/// is not PNG or JPEG is rejected before decoding.
pub fn normalize_to_png(data: &[u8]) -> Result<Vec<u8>, ImageError> {
    match sniff_mime(data) {
        Some(mime) if ALLOWED_MIME_TYPES.contains(&mime) => {}
        Some(mime) => return Err(ImageError::UnsupportedFormat(mime.to_string())),
        None => return Err(ImageError::UnsupportedFormat("unknown".to_string())),
    }

    encode_png(data)
}

/// Render a stored image as a PNG payload for search results.
///
/// Files already in PNG are returned as-is, anything else the decoder
/// understands is re-encoded.
pub fn png_payload(data: Vec<u8>) -> Result<Vec<u8>, ImageError> {
    if is_png(&data) {
        return Ok(data);
    }
    encode_png(&data)
}

fn encode_png(data: &[u8]) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory(data)?;

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
