//! File-type detection: classify raw bytes as PDF, DOCX, image or unknown.
//!
//! The byte signature decides first; the filename extension is only a
//! fallback for payloads `infer` cannot identify. A PDF uploaded as
//! `scan.png` is therefore still processed as a PDF.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Document kinds the pipeline knows how to extract images from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Image,
    Unknown,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Image => "image",
            FileType::Unknown => "unknown",
        })
    }
}

/// File extensions accepted when the signature is inconclusive.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".pdf", ".docx", ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".tif", ".webp",
];

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const IMAGE_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "image/webp",
];

/// Classify `bytes`, optionally helped by the original `filename`.
pub fn detect(bytes: &[u8], filename: Option<&str>) -> FileType {
    if let Some(kind) = detect_from_signature(bytes) {
        debug!("Detected {} from byte signature", kind);
        return kind;
    }

    let kind = filename.map(detect_from_extension).unwrap_or(FileType::Unknown);
    debug!(
        "Signature inconclusive, extension of {:?} gives {}",
        filename, kind
    );
    kind
}

fn detect_from_signature(bytes: &[u8]) -> Option<FileType> {
    let kind = infer::get(bytes)?;
    match kind.mime_type() {
        "application/pdf" => Some(FileType::Pdf),
        DOCX_MIME => Some(FileType::Docx),
        // Generic OOXML/ZIP: only a package with a main document part is DOCX.
        "application/zip" if is_docx_package(bytes) => Some(FileType::Docx),
        mime if IMAGE_MIMES.contains(&mime) => Some(FileType::Image),
        _ => None,
    }
}

fn detect_from_extension(filename: &str) -> FileType {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()));

    match ext.as_deref() {
        Some(".pdf") => FileType::Pdf,
        Some(".docx") => FileType::Docx,
        Some(e) if SUPPORTED_EXTENSIONS.contains(&e) => FileType::Image,
        _ => FileType::Unknown,
    }
}

fn is_docx_package(bytes: &[u8]) -> bool {
    ZipArchive::new(Cursor::new(bytes))
        .map(|mut archive| archive.by_name("word/document.xml").is_ok())
        .unwrap_or(false)
}
