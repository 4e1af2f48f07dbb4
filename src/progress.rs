//! Progress-callback trait for per-stage and per-image pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe a
//! run as it moves through the stages and transcribes each image.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2json::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct StageLogger;
//!
//! impl PipelineProgressCallback for StageLogger {
//!     fn on_stage(&self, stage: Stage) {
//!         eprintln!("→ {stage}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(StageLogger) as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// States of a single document run.
///
/// A run moves strictly forward through these states; any failure exits
/// directly to the caller without visiting the remaining ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Detecting,
    Extracting,
    Transcribing,
    ExtractingJson,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Detecting => "detecting",
            Stage::Extracting => "extracting",
            Stage::Transcribing => "transcribing",
            Stage::ExtractingJson => "extracting-json",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Called by the pipeline as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// With `concurrency > 1`, `on_image_start` and `on_image_complete` may be
/// called from several tasks at once and in any order. Implementations must
/// protect shared mutable state accordingly.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called when the run enters `stage`.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once extraction has produced the image sequence.
    fn on_images_extracted(&self, count: usize) {
        let _ = count;
    }

    /// Called just before the OCR request for an image is sent.
    ///
    /// `index` is 1-based in sequence order.
    fn on_image_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when an image has been transcribed and cleaned.
    ///
    /// `markdown_len` is the byte length of the cleaned fragment; zero
    /// means the fragment will be dropped.
    fn on_image_complete(&self, index: usize, total: usize, markdown_len: usize) {
        let _ = (index, total, markdown_len);
    }

    /// Called once at the end of the run, successful or not.
    fn on_finished(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
