//! Accepted file types and generated storage names.

use chrono::{DateTime, Utc};

/// Image types the receiver accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageExtension {
    Jpg,
    Jpeg,
    Png,
    Gif,
    Bmp,
    Webp,
}

impl ImageExtension {
    /// Match a dotted extension case-insensitively (".JPG" -> Jpg).
    pub fn parse(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            ".jpg" => Some(Self::Jpg),
            ".jpeg" => Some(Self::Jpeg),
            ".png" => Some(Self::Png),
            ".gif" => Some(Self::Gif),
            ".bmp" => Some(Self::Bmp),
            ".webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Stored content type, derived from the extension only.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Webp => "image/webp",
        }
    }

    pub fn is_jpeg(&self) -> bool {
        matches!(self, Self::Jpg | Self::Jpeg)
    }
}

/// A client filename split into the parts used for naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadName {
    /// Sanitized basename without extension
    pub basename: String,
    /// Extension as sent, including the dot
    pub extension: String,
    pub kind: ImageExtension,
}

impl UploadName {
    /// Split a client filename. Returns `None` when the extension is not an
    /// accepted image type.
    pub fn parse(filename: &str) -> Option<Self> {
        // clients may send a full path
        let file = filename
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(filename);

        let dot = file.rfind('.')?;
        let (stem, extension) = file.split_at(dot);
        let kind = ImageExtension::parse(extension)?;

        // Only [A-Za-z0-9_-] reaches a path; names differing in other
        // characters collapse to the same stored name.
        Some(Self {
            basename: sanitize_path_component(stem),
            extension: extension.to_string(),
            kind,
        })
    }

    /// `<YYYYMMDD_HHMMSS>_<basename><ext>` in UTC.
    pub fn storage_name(&self, now: DateTime<Utc>) -> String {
        format!(
            "{timestamp}_{basename}{extension}",
            timestamp = now.format("%Y%m%d_%H%M%S"),
            basename = self.basename,
            extension = self.extension,
        )
    }
}

/// Sanitize a path component to prevent path traversal
pub fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
