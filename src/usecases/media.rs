//! Outbound media input and extension-based kind/mimetype inference.

use crate::domain::MediaKind;
use std::path::Path;

/// A media file to send. `seconds` and `waveform` only matter for audio; zero/empty means
/// "derive it".
#[derive(Debug, Clone)]
pub struct MediaInput {
    pub data: Vec<u8>,
    pub kind: MediaKind,
    pub mimetype: String,
    pub caption: String,
    pub file_name: String,
    pub seconds: u32,
    pub waveform: Vec<u8>,
}

impl MediaInput {
    /// Builds an input from a file already read into memory, inferring kind and mimetype
    /// from the extension.
    pub fn from_file(path: &Path, data: Vec<u8>, caption: impl Into<String>) -> Self {
        let ext = extension(path);
        Self {
            data,
            kind: kind_for_ext(&ext),
            mimetype: mime_for_ext(&ext).to_string(),
            caption: caption.into(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            seconds: 0,
            waveform: Vec::new(),
        }
    }

    pub fn is_ogg_opus(&self) -> bool {
        let m = self.mimetype.to_ascii_lowercase();
        m.contains("ogg") || m.contains("opus")
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn kind_for_ext(ext: &str) -> MediaKind {
    match ext.trim_start_matches('.') {
        "jpg" | "jpeg" | "png" | "webp" | "gif" => MediaKind::Image,
        "mp4" | "mov" | "m4v" | "webm" => MediaKind::Video,
        "ogg" | "opus" | "mp3" | "m4a" | "wav" => MediaKind::Audio,
        _ => MediaKind::Document,
    }
}

pub fn mime_for_ext(ext: &str) -> &'static str {
    match ext.trim_start_matches('.') {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "ogg" | "opus" => "audio/ogg; codecs=opus",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
