//! PDF rasterisation and tiling via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Rendering, enhancement, tiling and PNG encoding are all CPU-bound, so the
//! whole page loop runs on the blocking pool and hands back a finished
//! [`ExtractedImageSequence`].
//!
//! ## Why a fixed DPI instead of a pixel cap?
//!
//! Scanned forms must keep their digits legible. Every page is rendered at
//! `dpi / 72` scale regardless of its physical size, and oversized renders
//! are tiled ([`crate::pipeline::tile`]) rather than downscaled.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::encode::{encode_png, ExtractedImage, ExtractedImageSequence, ImageSource};
use crate::pipeline::enhance::ScanEnhancer;
use crate::pipeline::tile::tile_page;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// `PdfTiler`: render every page, enhance it, tile it, and encode the tiles.
pub async fn extract_pdf_tiles(
    pdf_bytes: Arc<[u8]>,
    config: &PipelineConfig,
    enhancer: Arc<dyn ScanEnhancer>,
) -> Result<ExtractedImageSequence, PipelineError> {
    let settings = RenderSettings::from(config);

    tokio::task::spawn_blocking(move || {
        extract_pdf_tiles_blocking(&pdf_bytes, &settings, enhancer.as_ref())
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("Render task panicked: {}", e)))?
}

/// Owned copy of the config fields the blocking task needs.
#[derive(Debug, Clone)]
struct RenderSettings {
    scale: f32,
    max_tile_size: u32,
    tile_overlap: u32,
    library_path: Option<std::path::PathBuf>,
}

impl From<&PipelineConfig> for RenderSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            scale: config.render_scale(),
            max_tile_size: config.max_tile_size,
            tile_overlap: config.tile_overlap,
            library_path: config.pdfium_library_path.clone(),
        }
    }
}

/// Blocking implementation of page rendering.
fn extract_pdf_tiles_blocking(
    pdf_bytes: &[u8],
    settings: &RenderSettings,
    enhancer: &dyn ScanEnhancer,
) -> Result<ExtractedImageSequence, PipelineError> {
    let pdfium = bind_pdfium(settings.library_path.as_deref())?;

    let document = pdfium
        .load_pdf_from_byte_slice(pdf_bytes, None)
        .map_err(|e| PipelineError::CorruptPdf {
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let render_config = PdfRenderConfig::new().scale_page_by_factor(settings.scale);

    let mut sequence = ExtractedImageSequence::new();

    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            PipelineError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        // pdfium renders onto an opaque white background; drop the alpha channel.
        let rendered = DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8());
        let enhanced = enhancer.enhance(rendered);
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            enhanced.width(),
            enhanced.height()
        );

        let tiles = tile_page(idx, enhanced, settings.max_tile_size, settings.tile_overlap);
        if tiles.len() > 1 {
            debug!("Page {} split into {} tiles", idx + 1, tiles.len());
        }

        for (tile, pixels) in tiles {
            let data = encode_png(&pixels).map_err(|e| PipelineError::RasterisationFailed {
                page: idx + 1,
                detail: format!("Image encoding failed: {}", e),
            })?;
            sequence.push(ExtractedImage {
                source: ImageSource::PdfTile(tile),
                data,
            });
        }
    }

    Ok(sequence)
}

/// Bind pdfium from an explicit path, the working directory, or the system.
///
/// An explicit path may name the library file itself or the directory
/// holding it.
fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, PipelineError> {
    let bindings = match library_path {
        Some(path) if path.is_file() => Pdfium::bind_to_library(path),
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}
