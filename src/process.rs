//! The orchestrator: one document in, one [`PipelineResult`] out.
//!
//! A run moves strictly forward:
//!
//! ```text
//! Detecting ─▶ Extracting ─▶ Transcribing ─▶ ExtractingJson ─▶ Done
//!     │             │              │                │
//!     └─────────────┴──────────────┴────────────────┴──▶ { "error": ... }
//! ```
//!
//! Nothing is retried here and nothing is shared between runs; a new call
//! starts again from the raw bytes. Model timeouts and retries belong to the
//! [`VisionLanguageModel`] implementation.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{ExtractionReport, PipelineResult};
use crate::pipeline::detect::{detect, FileType};
use crate::pipeline::docx::extract_docx_images;
use crate::pipeline::encode::{extract_uploaded_image, ExtractedImageSequence};
use crate::pipeline::enhance::{ContrastStretch, ScanEnhancer};
use crate::pipeline::llm::VisionLanguageModel;
use crate::pipeline::markdown::transcribe;
use crate::pipeline::render::extract_pdf_tiles;
use crate::pipeline::structure::extract_tables;
use crate::progress::Stage;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Immutable input of one run: bytes, optional name, detected type.
#[derive(Debug, Clone)]
pub struct RawDocument {
    bytes: Arc<[u8]>,
    filename: Option<String>,
    file_type: FileType,
}

impl RawDocument {
    /// Wrap `bytes` and classify them.
    pub fn new(bytes: impl Into<Arc<[u8]>>, filename: Option<&str>) -> Self {
        let bytes = bytes.into();
        let file_type = detect(&bytes, filename);
        Self {
            bytes,
            filename: filename.map(str::to_string),
            file_type,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }
}

/// Document-to-JSON pipeline bound to one model and one configuration.
///
/// # Example
///
/// ```rust,no_run
/// use edgequake_doc2json::{OpenAiCompatibleConfig, OpenAiCompatibleModel, Pipeline, PipelineConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let model = OpenAiCompatibleModel::new(OpenAiCompatibleConfig::default())?;
///     let pipeline = Pipeline::new(Arc::new(model), PipelineConfig::default());
///
///     let bytes = std::fs::read("balance.pdf")?;
///     let result = pipeline.process_document(&bytes, Some("balance.pdf")).await;
///     println!("{}", result.to_json(true)?);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    model: Arc<dyn VisionLanguageModel>,
    enhancer: Arc<dyn ScanEnhancer>,
    config: PipelineConfig,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("model", &self.model.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline using [`ContrastStretch`] as scan enhancer.
    pub fn new(model: Arc<dyn VisionLanguageModel>, config: PipelineConfig) -> Self {
        Self {
            model,
            enhancer: Arc::new(ContrastStretch::default()),
            config,
        }
    }

    /// Replace the scan enhancer applied to rendered PDF pages.
    pub fn with_enhancer(mut self, enhancer: Arc<dyn ScanEnhancer>) -> Self {
        self.enhancer = enhancer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline. Never returns an error and never panics:
    /// every failure becomes [`PipelineResult::Failure`].
    pub async fn process_document(&self, bytes: &[u8], filename: Option<&str>) -> PipelineResult {
        let run = AssertUnwindSafe(self.try_process_document(bytes, filename)).catch_unwind();
        let result = match run.await {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                Err(PipelineError::Internal(detail))
            }
        };

        if let Err(e) = &result {
            error!("Document processing failed: {}", e);
        }
        if let Some(cb) = &self.config.progress_callback {
            cb.on_finished(result.is_ok());
        }
        result.into()
    }

    /// Run the whole pipeline, returning the typed error on failure.
    pub async fn try_process_document(
        &self,
        bytes: &[u8],
        filename: Option<&str>,
    ) -> Result<ExtractionReport, PipelineError> {
        let total_start = Instant::now();

        let markdown = self.transcribe_document(bytes, filename).await?;

        self.enter(Stage::ExtractingJson);
        let report = extract_tables(&markdown, self.model.as_ref(), &self.config).await?;

        self.enter(Stage::Done);
        info!("Document processed in {:?}", total_start.elapsed());
        Ok(report)
    }

    /// Run detection, extraction and Stage 1 only, returning the Markdown.
    pub async fn transcribe_document(
        &self,
        bytes: &[u8],
        filename: Option<&str>,
    ) -> Result<String, PipelineError> {
        self.enter(Stage::Detecting);
        let document = RawDocument::new(bytes, filename);
        info!(
            "Detected {} ({} bytes, name: {})",
            document.file_type(),
            document.bytes().len(),
            document.filename().unwrap_or("-")
        );

        self.enter(Stage::Extracting);
        let images = self.extract_images(&document).await?;
        if images.is_empty() {
            return Err(PipelineError::NoImagesExtracted);
        }
        info!("Extracted {} images", images.len());
        if let Some(cb) = &self.config.progress_callback {
            cb.on_images_extracted(images.len());
        }
        // The document bytes are no longer needed once images exist.
        drop(document);

        self.enter(Stage::Transcribing);
        transcribe(&images, self.model.as_ref(), &self.config).await
    }

    /// Dispatch to the extractor matching the detected type.
    pub async fn extract_images(
        &self,
        document: &RawDocument,
    ) -> Result<ExtractedImageSequence, PipelineError> {
        match document.file_type() {
            FileType::Pdf => {
                extract_pdf_tiles(
                    Arc::clone(&document.bytes),
                    &self.config,
                    Arc::clone(&self.enhancer),
                )
                .await
            }
            FileType::Docx => extract_docx_images(document.bytes()),
            FileType::Image => extract_uploaded_image(document.bytes()),
            FileType::Unknown => Err(PipelineError::UnsupportedFileType),
        }
    }

    /// Blocking wrapper around [`Self::process_document`].
    ///
    /// Creates its own runtime; do not call from inside an async context.
    pub fn process_document_sync(&self, bytes: &[u8], filename: Option<&str>) -> PipelineResult {
        match tokio::runtime::Runtime::new() {
            Ok(rt) => rt.block_on(self.process_document(bytes, filename)),
            Err(e) => PipelineResult::Failure {
                error: PipelineError::Internal(format!("Failed to create tokio runtime: {e}"))
                    .to_string(),
            },
        }
    }

    fn enter(&self, stage: Stage) {
        debug!("Stage → {}", stage);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage(stage);
        }
    }
}
