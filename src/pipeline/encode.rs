//! Image encoding: every extraction path converges on [`ExtractedImageSequence`].
//!
//! VLM endpoints accept images as base64 data-URIs embedded in the JSON
//! request body. Page renders and tiles are encoded as PNG because it is
//! lossless; text crispness matters far more than payload size for OCR.
//! Embedded and uploaded images that already are PNG or JPEG are forwarded
//! byte-for-byte; anything else is decoded and re-encoded as PNG.

use crate::error::PipelineError;
use crate::pipeline::tile::Tile;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Where an extracted image came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A tile of a rendered PDF page.
    PdfTile(Tile),
    /// An image part embedded in a DOCX package.
    DocxPart { index: usize, part_name: String },
    /// The uploaded file itself was an image.
    Upload,
}

/// One image ready for the OCR request.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub source: ImageSource,
    pub data: ImageData,
}

/// Ordered images of one document, in reading order.
///
/// Order is page order, then tile order within a page (top-to-bottom or
/// left-to-right), or document order for DOCX parts. Stage 1 relies on it.
#[derive(Debug, Clone, Default)]
pub struct ExtractedImageSequence {
    images: Vec<ExtractedImage>,
}

impl ExtractedImageSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, image: ExtractedImage) {
        self.images.push(image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractedImage> {
        self.images.iter()
    }

    pub fn sources(&self) -> Vec<&ImageSource> {
        self.images.iter().map(|i| &i.source).collect()
    }
}

impl FromIterator<ExtractedImage> for ExtractedImageSequence {
    fn from_iter<I: IntoIterator<Item = ExtractedImage>>(iter: I) -> Self {
        Self {
            images: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ExtractedImageSequence {
    type Item = ExtractedImage;
    type IntoIter = std::vec::IntoIter<ExtractedImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_iter()
    }
}

/// Encode a rendered page or tile as a base64 PNG.
pub fn encode_png(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded {}x{} image → {} bytes base64", img.width(), img.height(), b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Turn raw image bytes into a transport payload.
///
/// The bytes are always decoded once so corrupt or unsupported payloads
/// fail here rather than at the VLM.
pub fn normalize_image(bytes: &[u8]) -> Result<ImageData, PipelineError> {
    let format = image::guess_format(bytes).map_err(|e| PipelineError::ImageDecode {
        detail: e.to_string(),
    })?;
    let decoded = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        PipelineError::ImageDecode {
            detail: e.to_string(),
        }
    })?;

    match format {
        ImageFormat::Png | ImageFormat::Jpeg => {
            let b64 = STANDARD.encode(bytes);
            Ok(ImageData::new(b64, format.to_mime_type()).with_detail("high"))
        }
        _ => encode_png(&decoded).map_err(|e| PipelineError::ImageDecode {
            detail: e.to_string(),
        }),
    }
}

/// `ImageNormalizer`: the single-image extraction path.
pub fn extract_uploaded_image(bytes: &[u8]) -> Result<ExtractedImageSequence, PipelineError> {
    let data = normalize_image(bytes)?;
    Ok(std::iter::once(ExtractedImage {
        source: ImageSource::Upload,
        data,
    })
    .collect())
}
