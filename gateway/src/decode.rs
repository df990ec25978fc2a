//! Image payload decoding.
//!
//! Frames arrive either as base64 text (optionally a `data:image/...;base64,`
//! URL) or as raw binary. Decoding happens on the session before submission so
//! malformed payloads never occupy a worker.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Image container formats recognised by their magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Webp,
}

impl ImageFormat {
    /// Detect the format from the leading bytes of an image.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(PNG) {
            Some(Self::Png)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else if bytes.starts_with(b"BM") {
            Some(Self::Bmp)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payload that passed decoding and format detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    bytes: Vec<u8>,
    format: ImageFormat,
}

impl DecodedImage {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Size of the decoded image in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Re-encode the image as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty image")]
    Empty,

    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    #[error("unsupported image format")]
    UnsupportedFormat,
}

/// Decode a base64 payload, accepting `data:` URLs.
pub fn decode_base64(payload: &str) -> Result<DecodedImage, DecodeError> {
    let encoded = strip_data_url(payload).trim();
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
    decode_bytes(bytes)
}

/// Validate a raw binary payload.
pub fn decode_bytes(bytes: Vec<u8>) -> Result<DecodedImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let format = ImageFormat::sniff(&bytes).ok_or(DecodeError::UnsupportedFormat)?;
    Ok(DecodedImage { bytes, format })
}

fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:") {
        if let Some((_, data)) = payload.split_once(',') {
            return data;
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    #[test]
    fn test_decode_plain_base64() {
        let encoded = STANDARD.encode(PNG_HEADER);
        let image = decode_base64(&encoded).unwrap();
        assert_eq!(image.format(), ImageFormat::Png);
        assert_eq!(image.bytes(), PNG_HEADER);
        assert_eq!(image.byte_len(), PNG_HEADER.len());
        assert_eq!(image.to_base64(), encoded);
    }

    #[test]
    fn test_decode_data_url() {
        let encoded = format!("data:image/png;base64,{}", STANDARD.encode(PNG_HEADER));
        let image = decode_base64(&encoded).unwrap();
        assert_eq!(image.format(), ImageFormat::Png);
    }

    #[test]
    fn test_decode_invalid_base64() {
        let err = decode_base64("not-base64").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(decode_base64("").unwrap_err(), DecodeError::Empty);
        assert_eq!(decode_base64("data:image/png;base64,").unwrap_err(), DecodeError::Empty);
        assert_eq!(decode_bytes(Vec::new()).unwrap_err(), DecodeError::Empty);
    }

    #[test]
    fn test_decode_unknown_format() {
        let encoded = STANDARD.encode(b"just some text, not an image");
        assert_eq!(decode_base64(&encoded).unwrap_err(), DecodeError::UnsupportedFormat);
    }

    #[test]
    fn test_sniff_formats() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(b"GIF89a...."), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(b"BM\0\0\0\0"), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WAVE"), None);
        assert_eq!(ImageFormat::sniff(b"\x00\x01"), None);
    }
}
