//! Configuration types for document-to-JSON extraction.
//!
//! All pipeline behaviour that may differ between deployments is controlled
//! through [`PipelineConfig`], built via its [`PipelineConfigBuilder`]. The
//! struct is constructed once at process start and handed to
//! [`crate::Pipeline::new`]; no stage reads the environment on its own.
//!
//! Sampling parameters for the two model passes are deliberately absent:
//! they are fixed per stage (see [`crate::pipeline::llm::SamplingConfig`]).

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// Configuration for a document run.
///
/// # Example
/// ```rust
/// use edgequake_doc2json::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .max_tile_size(3072)
///     .tile_overlap(96)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    ///
    /// Pages are rendered through a `dpi / 72` scale matrix, so an A4 page at
    /// 150 DPI comes out at roughly 1240 × 1754 px.
    pub dpi: u32,

    /// Maximum tile edge in pixels. Default: 4096.
    ///
    /// Renders with either side above this are sliced along their longer
    /// side. Should match the VLM's input image limit.
    pub max_tile_size: u32,

    /// Pixels shared by consecutive tiles. Default: 120.
    ///
    /// Must be smaller than `max_tile_size`; a table row cut at one seam is
    /// then fully visible in the neighbouring tile.
    pub tile_overlap: u32,

    /// Number of OCR calls in flight. Default: 1 (strictly sequential).
    ///
    /// Fragments are always reassembled in sequence order regardless of
    /// this value.
    pub concurrency: usize,

    /// Upper bound on tokens generated per model call. Default: backend default.
    pub max_tokens: Option<usize>,

    /// Characters of the raw model response kept in JSON parse errors. Default: 500.
    pub response_excerpt_chars: usize,

    /// Path to libpdfium (file or directory). Default: `./` then system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_tile_size: 4096,
            tile_overlap: 120,
            concurrency: 1,
            max_tokens: None,
            response_excerpt_chars: 500,
            pdfium_library_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_tile_size", &self.max_tile_size)
            .field("tile_overlap", &self.tile_overlap)
            .field("concurrency", &self.concurrency)
            .field("max_tokens", &self.max_tokens)
            .field("response_excerpt_chars", &self.response_excerpt_chars)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// PDF points-to-pixels scale factor applied in both axes.
    pub fn render_scale(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_tile_size(mut self, px: u32) -> Self {
        self.config.max_tile_size = px;
        self
    }

    pub fn tile_overlap(mut self, px: u32) -> Self {
        self.config.tile_overlap = px;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = Some(n);
        self
    }

    pub fn response_excerpt_chars(mut self, n: usize) -> Self {
        self.config.response_excerpt_chars = n;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tile_size < 256 {
            return Err(PipelineError::InvalidConfig(format!(
                "maximum tile size must be at least 256 px, got {}",
                c.max_tile_size
            )));
        }
        if c.tile_overlap >= c.max_tile_size {
            return Err(PipelineError::InvalidConfig(format!(
                "tile overlap ({}) must be smaller than the maximum tile size ({})",
                c.tile_overlap, c.max_tile_size
            )));
        }
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.max_tile_size, 4096);
        assert_eq!(c.tile_overlap, 120);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.response_excerpt_chars, 500);
    }

    #[test]
    fn render_scale_is_dpi_over_72() {
        let c = PipelineConfig::builder().dpi(144).build().unwrap();
        assert!((c.render_scale() - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for builder in [
            PipelineConfig::builder().dpi(10),
            PipelineConfig::builder().dpi(600),
            PipelineConfig::builder().concurrency(0),
        ] {
            let err = builder.build().unwrap_err();
            assert!(matches!(err, PipelineError::InvalidConfig(_)), "{err}");
        }
    }

    #[test]
    fn boundary_values_are_accepted() {
        let c = PipelineConfig::builder()
            .dpi(72)
            .max_tile_size(256)
            .tile_overlap(255)
            .build()
            .unwrap();
        assert_eq!((c.dpi, c.max_tile_size, c.tile_overlap), (72, 256, 255));
        assert!(PipelineConfig::builder().dpi(400).build().is_ok());
    }

    #[test]
    fn overlap_must_be_below_tile_size() {
        let err = PipelineConfig::builder()
            .max_tile_size(512)
            .tile_overlap(512)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn tiny_tiles_are_rejected() {
        let err = PipelineConfig::builder()
            .max_tile_size(128)
            .tile_overlap(16)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("256"));
    }

    #[test]
    fn debug_hides_callback() {
        let c = PipelineConfig::default();
        let s = format!("{c:?}");
        assert!(s.contains("max_tile_size: 4096"));
        assert!(s.contains("progress_callback: None"));
    }
}
