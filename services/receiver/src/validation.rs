//! Request-level checks run before anything is written.

use crate::naming::{ImageExtension, UploadName};
use axum::http::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Why an upload was refused. Every variant maps to a 4xx response.
#[derive(Debug, Error, PartialEq)]
pub enum UploadRejection {
    #[error("Failed to parse multipart form")]
    MalformedMultipart(String),

    #[error("Failed to get file from form")]
    MissingFile,

    #[error("File must be an image")]
    NotAnImage(String),

    #[error("File too small to be valid JPEG")]
    JpegTooSmall(usize),

    #[error("Invalid JPEG file format")]
    InvalidJpeg(String),

    #[error("File exceeds the upload size limit")]
    TooLarge,
}

impl UploadRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadRejection::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable code for error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            UploadRejection::MalformedMultipart(_) => "MALFORMED_MULTIPART",
            UploadRejection::MissingFile => "MISSING_FILE",
            UploadRejection::NotAnImage(_) => "NOT_AN_IMAGE",
            UploadRejection::JpegTooSmall(_) => "JPEG_TOO_SMALL",
            UploadRejection::InvalidJpeg(_) => "INVALID_JPEG",
            UploadRejection::TooLarge => "TOO_LARGE",
        }
    }
}

/// Check the filename against the allow-list.
pub fn check_filename(filename: &str) -> Result<UploadName, UploadRejection> {
    UploadName::parse(filename).ok_or_else(|| UploadRejection::NotAnImage(filename.to_string()))
}

/// Check the payload against its declared type. Only JPEG content is inspected.
pub fn check_payload(kind: ImageExtension, data: &[u8]) -> Result<(), UploadRejection> {
    if !kind.is_jpeg() {
        return Ok(());
    }

    if data.len() < 4 {
        warn!(bytes = data.len(), "File too small to be valid JPEG");
        return Err(UploadRejection::JpegTooSmall(data.len()));
    }

    if !data.starts_with(&JPEG_SOI) {
        let found = hex(&data[..3]);
        warn!(found = %found, "Invalid JPEG header, expected FF D8 FF");
        return Err(UploadRejection::InvalidJpeg(found));
    }

    if !data.ends_with(&JPEG_EOI) {
        warn!(
            tail = %hex(&data[data.len() - 2..]),
            "Missing JPEG end marker, expected FF D9"
        );
    } else {
        debug!(bytes = data.len(), "JPEG validation passed");
    }

    Ok(())
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disallowed_extension() {
        let rejection = check_filename("photo.exe").unwrap_err();
        assert_eq!(rejection, UploadRejection::NotAnImage("photo.exe".to_string()));
        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rejection.to_string(), "File must be an image");
    }

    #[test]
    fn test_jpeg_checks() {
        assert_eq!(
            check_payload(ImageExtension::Jpg, &[0xFF, 0xD8, 0xFF]),
            Err(UploadRejection::JpegTooSmall(3))
        );
        assert_eq!(
            check_payload(ImageExtension::Jpeg, &[0x89, 0x50, 0x4E, 0x47, 0x00]),
            Err(UploadRejection::InvalidJpeg("89 50 4E".to_string()))
        );
        assert!(check_payload(ImageExtension::Jpg, &[0xFF, 0xD8, 0xFF, 0xE0, 0xFF, 0xD9]).is_ok());
        // missing end marker is only logged
        assert!(check_payload(ImageExtension::Jpg, &[0xFF, 0xD8, 0xFF, 0xE0, 0x00]).is_ok());
    }

    #[test]
    fn test_non_jpeg_payload_not_inspected() {
        assert!(check_payload(ImageExtension::Png, &[0x00]).is_ok());
        assert!(check_payload(ImageExtension::Gif, &[]).is_ok());
    }

    #[test]
    fn test_rejection_codes() {
        assert_eq!(UploadRejection::MissingFile.code(), "MISSING_FILE");
        assert_eq!(UploadRejection::TooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            UploadRejection::InvalidJpeg(String::new()).to_string(),
            "Invalid JPEG file format"
        );
    }
}
