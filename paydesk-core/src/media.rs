//! Pre-upload media validation.
//!
//! Size and type limits are enforced at the point of file selection, before
//! any network call; the server applies the same checks on its side.

use crate::error::StoreError;

/// Images are capped at 5 MiB.
pub const IMAGE_MAX_BYTES: usize = 5 * 1024 * 1024;

/// PDFs (payment receipts) are capped at 10 MiB.
pub const PDF_MAX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Pdf,
}

impl MediaKind {
    /// Detect the kind from a file name's extension.
    pub fn from_file_name(name: &str) -> Option<MediaKind> {
        let ext = name.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" => Some(MediaKind::Image),
            "pdf" => Some(MediaKind::Pdf),
            _ => None,
        }
    }

    pub fn max_bytes(&self) -> usize {
        match self {
            MediaKind::Image => IMAGE_MAX_BYTES,
            MediaKind::Pdf => PDF_MAX_BYTES,
        }
    }
}

/// Content type used when serving a stored file back.
pub fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next().map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// A validated file ready for upload. Constructors reject oversized or
/// wrongly-typed files so an invalid payload can never reach the transport.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub file_name: String,
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
}

impl MediaPayload {
    /// Accept any supported media type, detected from the extension.
    pub fn from_file_name(file_name: &str, bytes: Vec<u8>) -> Result<Self, StoreError> {
        let kind = MediaKind::from_file_name(file_name)
            .ok_or_else(|| StoreError::UnsupportedType(file_name.to_string()))?;
        Self::validated(file_name, kind, bytes)
    }

    /// Accept only images.
    pub fn image(file_name: &str, bytes: Vec<u8>) -> Result<Self, StoreError> {
        match MediaKind::from_file_name(file_name) {
            Some(MediaKind::Image) => Self::validated(file_name, MediaKind::Image, bytes),
            _ => Err(StoreError::UnsupportedType(format!(
                "{} is not an image",
                file_name
            ))),
        }
    }

    /// Accept only PDFs — receipt flows require them.
    pub fn pdf(file_name: &str, bytes: Vec<u8>) -> Result<Self, StoreError> {
        match MediaKind::from_file_name(file_name) {
            Some(MediaKind::Pdf) => Self::validated(file_name, MediaKind::Pdf, bytes),
            _ => Err(StoreError::UnsupportedType(format!(
                "{} is not a PDF",
                file_name
            ))),
        }
    }

    fn validated(file_name: &str, kind: MediaKind, bytes: Vec<u8>) -> Result<Self, StoreError> {
        let limit = kind.max_bytes();
        if bytes.len() > limit {
            return Err(StoreError::PayloadTooLarge(format!(
                "{} is {} bytes, limit is {}",
                file_name,
                bytes.len(),
                limit
            )));
        }
        Ok(Self {
            file_name: file_name.to_string(),
            kind,
            bytes,
        })
    }
}
