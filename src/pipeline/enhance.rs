//! Scan enhancement applied to every rendered PDF page before tiling.
//!
//! Low-contrast scans (grey paper, faded toner) lose thin table rules and
//! small digits once the VLM downsamples them. A histogram stretch to the
//! full 0–255 range recovers most of that for free.
//!
//! The enhancer is a seam: [`crate::Pipeline::with_enhancer`] accepts any
//! [`ScanEnhancer`]. Implementations must preserve the image dimensions;
//! tiling is computed on the enhanced bitmap.

use image::{DynamicImage, GrayImage, Luma};

/// Transforms a rendered page bitmap into a more OCR-friendly one.
pub trait ScanEnhancer: Send + Sync {
    fn enhance(&self, image: DynamicImage) -> DynamicImage;
}

/// Leaves the bitmap untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnhancement;

impl ScanEnhancer for NoEnhancement {
    fn enhance(&self, image: DynamicImage) -> DynamicImage {
        image
    }
}

/// Grayscale conversion followed by a clipped histogram stretch.
///
/// `clip` is the fraction of darkest and brightest pixels ignored when
/// picking the stretch bounds, so a few specks of dust or a black scanner
/// border don't pin the range.
#[derive(Debug, Clone, Copy)]
pub struct ContrastStretch {
    pub clip: f32,
}

impl Default for ContrastStretch {
    fn default() -> Self {
        Self { clip: 0.005 }
    }
}

impl ScanEnhancer for ContrastStretch {
    fn enhance(&self, image: DynamicImage) -> DynamicImage {
        let mut gray = image.to_luma8();
        let Some((low, high)) = stretch_bounds(&gray, self.clip) else {
            return DynamicImage::ImageLuma8(gray);
        };

        let lut = build_lut(low, high);
        for p in gray.pixels_mut() {
            *p = Luma([lut[p.0[0] as usize]]);
        }
        DynamicImage::ImageLuma8(gray)
    }
}

/// Intensity bounds after clipping, or `None` for a flat image.
fn stretch_bounds(gray: &GrayImage, clip: f32) -> Option<(u8, u8)> {
    let mut histogram = [0u64; 256];
    for p in gray.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return None;
    }
    let cut = (total as f64 * clip.clamp(0.0, 0.49) as f64) as u64;

    let mut acc = 0u64;
    let low = histogram
        .iter()
        .position(|&n| {
            acc += n;
            acc > cut
        })
        .unwrap_or(0) as u8;

    acc = 0;
    let high = 255
        - histogram
            .iter()
            .rev()
            .position(|&n| {
                acc += n;
                acc > cut
            })
            .unwrap_or(0) as u8;

    (high > low).then_some((low, high))
}

fn build_lut(low: u8, high: u8) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let span = (high - low) as f32;
    for (v, out) in lut.iter_mut().enumerate() {
        let v = v as u8;
        *out = if v <= low {
            0
        } else if v >= high {
            255
        } else {
            (((v - low) as f32 / span) * 255.0).round() as u8
        };
    }
    lut
}
