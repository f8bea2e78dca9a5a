//! Media-kind inference, format sniffing, and content-type mapping

use std::path::Path;

use crate::types::MediaType;

const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".opus", ".ogg", ".m4a", ".wav", ".aac"];
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif"];
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".avi", ".mov", ".mkv", ".webm", ".flv"];

/// Human-readable list of recognized extensions, used in 400 details.
pub fn supported_extensions() -> String {
    format!(
        "audio ({}), image ({}), video ({})",
        AUDIO_EXTENSIONS.join(","),
        IMAGE_EXTENSIONS.join(","),
        VIDEO_EXTENSIONS.join(",")
    )
}

/// Infer the media kind from the URL suffix, case-insensitively.
pub fn infer_media_type(url: &str) -> Option<MediaType> {
    let lower = url.to_ascii_lowercase();
    if AUDIO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        Some(MediaType::Audio)
    } else if IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        Some(MediaType::Image)
    } else if VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Cache subdirectory for a media kind.
pub fn media_subdir(media_type: MediaType) -> &'static str {
    media_type.as_str()
}

/// Content type for streaming a processed artifact back to the caller,
/// derived from the final file extension so rewritten image outputs
/// (`.webp`, `.png`) are labeled correctly.
pub fn content_type_for(path: &Path, media_type: MediaType) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("opus") | Some("ogg") => "audio/ogg",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        _ => match media_type {
            MediaType::Audio => "audio/ogg",
            MediaType::Image => "image/jpeg",
            MediaType::Video => "video/mp4",
        },
    }
}

/// Input image formats the converter can preserve. Anything else is
/// re-encoded as JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Unknown,
}

impl ImageFormat {
    /// Sniff the format from the leading magic bytes.
    pub fn sniff(data: &[u8]) -> Self {
        if data.len() < 12 {
            return ImageFormat::Unknown;
        }
        if data[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
            ImageFormat::Png
        } else if data[0..2] == [0xFF, 0xD8] {
            ImageFormat::Jpeg
        } else if data[0..4] == *b"RIFF" && data[8..12] == *b"WEBP" {
            ImageFormat::Webp
        } else {
            ImageFormat::Unknown
        }
    }

    /// Output extension once unsupported formats fall back to JPEG.
    pub fn output_extension(self) -> &'static str {
        match self {
            ImageFormat::Png => ".png",
            ImageFormat::Webp => ".webp",
            ImageFormat::Jpeg | ImageFormat::Unknown => ".jpg",
        }
    }

    pub fn is_png(self) -> bool {
        self == ImageFormat::Png
    }
}
