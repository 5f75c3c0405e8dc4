//! Captured frames and their declared formats.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_IEND: [u8; 8] = [b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82];

/// Pixel/container format declared by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Jpeg,
    Png,
    Rgb565,
    Grayscale,
}

impl FrameFormat {
    /// Whether the format is a compressed container with known markers.
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Jpeg | FrameFormat::Png)
    }

    /// Leading bytes every well-formed frame of this format starts with.
    pub fn start_marker(&self) -> Option<&'static [u8]> {
        match self {
            FrameFormat::Jpeg => Some(&JPEG_SOI),
            FrameFormat::Png => Some(&PNG_SIGNATURE),
            FrameFormat::Rgb565 | FrameFormat::Grayscale => None,
        }
    }

    /// Trailing bytes of a complete frame. Some sensors omit them.
    pub fn end_marker(&self) -> Option<&'static [u8]> {
        match self {
            FrameFormat::Jpeg => Some(&JPEG_EOI),
            FrameFormat::Png => Some(&PNG_IEND),
            FrameFormat::Rgb565 | FrameFormat::Grayscale => None,
        }
    }

    /// File extension used for on-medium copies.
    pub fn extension(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "jpg",
            FrameFormat::Png => "png",
            FrameFormat::Rgb565 | FrameFormat::Grayscale => "raw",
        }
    }

    /// MIME type of the multipart part.
    pub fn content_type(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
            FrameFormat::Png => "image/png",
            FrameFormat::Rgb565 | FrameFormat::Grayscale => "application/octet-stream",
        }
    }
}

/// One captured image buffer plus metadata.
///
/// A frame is not `Clone`: whichever pipeline stage holds it owns it, and it
/// moves on every handoff.
#[derive(Debug)]
pub struct Frame {
    data: Bytes,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Declared format
    pub format: FrameFormat,

    /// Capture timestamp
    pub captured_at: DateTime<Utc>,

    /// Capture sequence number assigned by the sensor
    pub sequence: u64,
}

impl Frame {
    /// Create a frame captured now.
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: FrameFormat) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format,
            captured_at: Utc::now(),
            sequence: 0,
        }
    }

    /// Set the capture sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Byte length of the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A frame that passed validation.
///
/// Only `FrameValidator::validate` constructs this type.
#[derive(Debug)]
pub struct ValidatedFrame(Frame);

impl ValidatedFrame {
    pub(crate) fn new(frame: Frame) -> Self {
        Self(frame)
    }

    pub fn frame(&self) -> &Frame {
        &self.0
    }

    pub fn data(&self) -> &[u8] {
        self.0.data()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn format(&self) -> FrameFormat {
        self.0.format
    }

    /// Shared handle on the buffer; no copy is made.
    pub(crate) fn bytes(&self) -> Bytes {
        self.0.data.clone()
    }

    /// Release the frame and hand its buffer to the caller.
    pub fn into_bytes(self) -> Bytes {
        self.0.data
    }
}

/// Hex rendering of up to `n` leading bytes, for diagnostics.
pub fn hex_prefix(data: &[u8], n: usize) -> String {
    data.iter()
        .take(n)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex rendering of up to `n` trailing bytes, for diagnostics.
pub fn hex_suffix(data: &[u8], n: usize) -> String {
    let start = data.len().saturating_sub(n);
    hex_prefix(&data[start..], n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_markers() {
        assert_eq!(FrameFormat::Jpeg.start_marker(), Some(&[0xFF, 0xD8, 0xFF][..]));
        assert_eq!(FrameFormat::Jpeg.end_marker(), Some(&[0xFF, 0xD9][..]));
        assert!(FrameFormat::Jpeg.is_compressed());
        assert!(FrameFormat::Rgb565.start_marker().is_none());
    }

    #[test]
    fn test_extension_and_content_type() {
        assert_eq!(FrameFormat::Jpeg.extension(), "jpg");
        assert_eq!(FrameFormat::Png.content_type(), "image/png");
        assert_eq!(FrameFormat::Grayscale.extension(), "raw");
    }

    #[test]
    fn test_hex_helpers() {
        let data = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0xFF, 0xD9];
        assert_eq!(hex_prefix(&data, 3), "FF D8 FF");
        assert_eq!(hex_suffix(&data, 2), "FF D9");
        assert_eq!(hex_suffix(&data[..1], 2), "FF");
    }

    #[test]
    fn test_shared_bytes_do_not_copy() {
        let frame = ValidatedFrame::new(Frame::new(vec![0xFFu8; 64], 8, 8, FrameFormat::Rgb565));
        let shared = frame.bytes();
        assert_eq!(shared.as_ptr(), frame.data().as_ptr());
        assert_eq!(shared.len(), 64);
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let format: FrameFormat = serde_json::from_str("\"jpeg\"").unwrap();
        assert_eq!(format, FrameFormat::Jpeg);
    }
}
