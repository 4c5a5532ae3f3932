//! Raw page compression.
//!
//! Fetched pages are stored as zstd frames. [`decompress_page`] is the only
//! way back to text and is applied at the extraction boundary.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("page is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub fn compress_page(raw: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    zstd::encode_all(std::io::Cursor::new(raw), level).map_err(CodecError::Compress)
}

pub fn decompress_page(blob: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::decode_all(std::io::Cursor::new(blob)).map_err(CodecError::Decompress)
}

/// Decompress a stored page into HTML text.
pub fn decompress_html(blob: &[u8]) -> Result<String, CodecError> {
    Ok(String::from_utf8(decompress_page(blob)?)?)
}

/// Hex SHA-256 of the uncompressed page.
pub fn content_hash(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_survives_storage() {
        let html = "<html><body><div class=\"mortgage-1\">Charge code 0001</div></body></html>";
        let blob = compress_page(html.as_bytes(), 3).unwrap();
        assert_ne!(blob.as_slice(), html.as_bytes());
        assert_eq!(decompress_html(&blob).unwrap(), html);
    }

    #[test]
    fn test_empty_page() {
        let blob = compress_page(b"", 3).unwrap();
        assert_eq!(decompress_page(&blob).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_garbage_is_an_error() {
        let err = decompress_page(b"not a zstd frame").unwrap_err();
        assert!(matches!(err, CodecError::Decompress(_)));
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let blob = compress_page(&[0xff, 0xfe, 0x00], 3).unwrap();
        assert!(matches!(decompress_html(&blob), Err(CodecError::Utf8(_))));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
