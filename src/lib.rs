//! # edgequake-doc2json
//!
//! Turn scanned financial statements (PDF, DOCX, images) into schema-valid
//! JSON using a Vision Language Model (VLM).
//!
//! ## Why two passes?
//!
//! Asking a VLM for structured JSON straight from a scan mixes two hard
//! problems: reading the page and mapping it onto a schema. This crate
//! splits them. Every page image is first transcribed to Markdown one
//! image at a time, then the whole Markdown document is mapped onto the
//! balance-sheet schema in a single text-only call.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes
//!  │
//!  ├─ 1. Detect     PDF / DOCX / image from magic bytes, extension fallback
//!  ├─ 2. Extract    PDF: render at 150 DPI, enhance, tile to ≤ 4096 px
//!  │                DOCX: embedded images in document order
//!  │                image: re-encode as-is
//!  ├─ 3. Stage 1    one OCR call per image → cleaned Markdown, joined in order
//!  ├─ 4. Stage 2    one JSON call → parse by alias → reconcile 5 tables
//!  └─ 5. Result     { message, xlsx: null, tables_data } or { error }
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2json::{OpenAiCompatibleConfig, OpenAiCompatibleModel, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = OpenAiCompatibleModel::new(OpenAiCompatibleConfig {
//!         api_url: "http://localhost:8000/v1".into(),
//!         ..Default::default()
//!     })?;
//!     let pipeline = Pipeline::new(Arc::new(model), PipelineConfig::default());
//!
//!     let bytes = std::fs::read("balance.pdf")?;
//!     let result = pipeline.process_document(&bytes, Some("balance.pdf")).await;
//!     println!("{}", result.to_json(true)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2json` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doc2json = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Backend
//!
//! [`OpenAiCompatibleModel`] talks to a vLLM-style endpoint and forwards the
//! repetition penalty Stage 2 relies on. [`ProviderModel`] wraps any
//! `edgequake_llm` provider (OpenAI, Anthropic, Gemini, Ollama) for
//! deployments without a self-hosted model.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{OpenAiCompatibleConfig, OpenAiCompatibleModel};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{PipelineError, VlmError};
pub use output::{ExtractionReport, PipelineResult, TableStatus};
pub use pipeline::detect::FileType;
pub use pipeline::encode::{ExtractedImage, ExtractedImageSequence, ImageSource};
pub use pipeline::enhance::{ContrastStretch, NoEnhancement, ScanEnhancer};
pub use pipeline::llm::{ProviderModel, SamplingConfig, UserContent, VisionLanguageModel};
pub use pipeline::tile::Tile;
pub use process::{Pipeline, RawDocument};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
pub use schema::{BalanceDatesTable, BalanceHeadTable, MainTable, TablesData, REQUIRED_TABLES};
