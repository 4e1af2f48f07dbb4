//! Error types for the edgequake-doc2json library.
//!
//! Two distinct error types reflect two distinct failure sources:
//!
//! * [`PipelineError`]: **Fatal for the run**: the document cannot be turned
//!   into tables (unsupported bytes, nothing to transcribe, a response that
//!   does not match the schema). Every variant is terminal; the pipeline
//!   never retries on its own. [`crate::Pipeline::process_document`] renders
//!   these into `{"error": "..."}` so nothing escapes the public boundary.
//!
//! * [`VlmError`]: **Opaque upstream failure** raised by a
//!   [`crate::VisionLanguageModel`] implementation. Backends own their
//!   timeout/retry policy; whatever is left after that surfaces here and is
//!   wrapped in [`PipelineError::UpstreamModel`].
//!
//! `Display` strings of [`PipelineError`] are user-facing and written in
//! Russian, the language of the calling platform.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-doc2json library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Detection / extraction ────────────────────────────────────────────
    /// Neither the byte signature nor the filename identify a supported type.
    #[error(
        "Неподдерживаемый тип файла. Поддерживаются: PDF, DOCX, изображения (JPG, PNG, GIF, BMP, TIFF, WEBP)"
    )]
    UnsupportedFileType,

    /// The extractor ran but produced an empty image sequence.
    #[error(
        "Не удалось извлечь изображения из файла. Убедитесь, что файл содержит изображения или сканы документов."
    )]
    NoImagesExtracted,

    /// The PDF could not be opened by pdfium.
    #[error("Не удалось открыть PDF: {detail}")]
    CorruptPdf { detail: String },

    /// pdfium failed on a specific page.
    #[error("Ошибка растеризации страницы {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Не удалось загрузить библиотеку PDFium: {0}\n\
Укажите путь к библиотеке через PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    /// The DOCX container is not a readable OOXML package.
    #[error("Не удалось прочитать DOCX: {detail}")]
    InvalidDocx { detail: String },

    /// An image payload could not be decoded or re-encoded.
    #[error("Не удалось обработать изображение: {detail}")]
    ImageDecode { detail: String },

    // ── Model stages ──────────────────────────────────────────────────────
    /// Stage 1 produced only whitespace.
    #[error("OCR не вернул результатов. Возможно, изображения не содержат читаемого текста.")]
    EmptyOcrResult,

    /// Stage 2 response is not JSON or does not match the schema.
    ///
    /// `excerpt` is a bounded prefix of the raw model output.
    #[error("Ошибка парсинга JSON ответа от VLM: {reason}. Ответ: {excerpt}")]
    JsonParse { reason: String, excerpt: String },

    /// The vision-language model capability failed.
    #[error("Ошибка обращения к VLM: {0}")]
    UpstreamModel(#[from] VlmError),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Файл не найден: '{path}'")]
    FileNotFound { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Не удалось скачать '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Некорректная конфигурация: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Внутренняя ошибка обработки: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Build a [`PipelineError::JsonParse`] keeping at most `max_chars`
    /// characters of the raw response.
    pub fn json_parse(reason: impl Into<String>, raw: &str, max_chars: usize) -> Self {
        Self::JsonParse {
            reason: reason.into(),
            excerpt: raw.chars().take(max_chars).collect(),
        }
    }
}

/// Failure reported by a [`crate::VisionLanguageModel`] backend.
#[derive(Debug, Clone, Error)]
pub enum VlmError {
    /// The endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure (DNS, TLS, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded the backend's timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// An `edgequake-llm` provider returned an error.
    #[error("provider error: {0}")]
    Provider(String),

    /// The response carried no choices / no content.
    #[error("empty response from model")]
    EmptyResponse,

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl VlmError {
    /// Whether a backend should retry the call.
    ///
    /// 429 and 5xx are transient under load; other 4xx (bad key, bad
    /// request) will fail identically on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            VlmError::Http { status, .. } => *status == 429 || *status >= 500,
            VlmError::Transport(_) | VlmError::Timeout { .. } => true,
            VlmError::Provider(_) | VlmError::EmptyResponse | VlmError::InvalidResponse(_) => false,
        }
    }
}
