//! Pipeline stages for document-to-JSON extraction.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─▶ render ─▶ enhance ─▶ tile ─┐
//! detect ────┼─▶ docx ──────────────────────┼─▶ encode ─▶ markdown ─▶ structure
//! (magic)    └─▶ encode (single image) ─────┘  (base64)   (Stage 1)   (Stage 2)
//! ```
//!
//! 1. [`detect`]: classify bytes as PDF, DOCX or image
//! 2. [`render`]: rasterise PDF pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`enhance`] / [`tile`]: scan enhancement and oversized-page slicing
//! 4. [`docx`]: embedded images of a DOCX in document order
//! 5. [`encode`]: the shared [`encode::ExtractedImageSequence`] shape
//! 6. [`llm`]: the [`llm::VisionLanguageModel`] capability
//! 7. [`markdown`]: one OCR call per image, joined in order
//! 8. [`postprocess`]: deterministic cleanup rules between the stages
//! 9. [`structure`]: JSON extraction, schema validation, reconciliation
//!
//! [`input`] sits in front of all of this for the CLI: local path or URL.

pub mod detect;
pub mod docx;
pub mod encode;
pub mod enhance;
pub mod input;
pub mod llm;
pub mod markdown;
pub mod postprocess;
pub mod render;
pub mod structure;
pub mod tile;
