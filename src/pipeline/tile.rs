//! Tiling: slice oversized page renders into overlapping tiles.
//!
//! VLM backends cap input images well below a 150 DPI scan of a large page.
//! A render that fits within `max_tile_size` on both sides stays whole;
//! otherwise it is cut along its longer side only, each slice `max_tile_size`
//! long except the last, consecutive slices sharing `overlap` pixels so a
//! table row split at a seam is fully visible in one of the two tiles.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// One rectangular region of a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// 0-based page index in the source document.
    pub page_index: usize,
    /// 0-based tile index within the page, in reading order.
    pub tile_index: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Pixels shared with the previous tile on the same page (0 for the first).
    pub overlap: u32,
}

impl Tile {
    /// Far edge along the slicing axis (exclusive).
    pub fn end_x(&self) -> u32 {
        self.x + self.width
    }

    pub fn end_y(&self) -> u32 {
        self.y + self.height
    }
}

/// Compute the tile layout of a `width × height` page.
///
/// `overlap` is clamped to `max_tile_size - 1` (and `max_tile_size` to at
/// least 1), so every step advances by at least one pixel and the final
/// tile ends exactly on the page edge for any input.
pub fn plan_tiles(
    page_index: usize,
    width: u32,
    height: u32,
    max_tile_size: u32,
    overlap: u32,
) -> Vec<Tile> {
    let max_tile_size = max_tile_size.max(1);
    let overlap = overlap.min(max_tile_size - 1);

    if width <= max_tile_size && height <= max_tile_size {
        return vec![Tile {
            page_index,
            tile_index: 0,
            x: 0,
            y: 0,
            width,
            height,
            overlap: 0,
        }];
    }

    let vertical = height > width;
    let extent = if vertical { height } else { width };
    let spans = slice_axis(extent, max_tile_size, overlap);

    spans
        .into_iter()
        .enumerate()
        .map(|(tile_index, (start, end, shared))| {
            let (x, y, w, h) = if vertical {
                (0, start, width, end - start)
            } else {
                (start, 0, end - start, height)
            };
            Tile {
                page_index,
                tile_index,
                x,
                y,
                width: w,
                height: h,
                overlap: shared,
            }
        })
        .collect()
}

/// Split `[0, extent)` into `(start, end, overlap_with_previous)` spans.
fn slice_axis(extent: u32, max_tile_size: u32, overlap: u32) -> Vec<(u32, u32, u32)> {
    let mut spans = Vec::new();
    let mut start = 0u32;
    let mut shared = 0u32;

    loop {
        let end = start.saturating_add(max_tile_size).min(extent);
        spans.push((start, end, shared));
        if end == extent {
            break;
        }
        // end - start == max_tile_size > overlap here, so the loop advances.
        start = end - overlap;
        shared = overlap;
    }

    spans
}

/// Cut `image` into tiles according to [`plan_tiles`].
pub fn tile_page(
    page_index: usize,
    image: DynamicImage,
    max_tile_size: u32,
    overlap: u32,
) -> Vec<(Tile, DynamicImage)> {
    let tiles = plan_tiles(
        page_index,
        image.width(),
        image.height(),
        max_tile_size,
        overlap,
    );

    if tiles.len() == 1 {
        return vec![(tiles[0], image)];
    }

    tiles
        .into_iter()
        .map(|t| (t, image.crop_imm(t.x, t.y, t.width, t.height)))
        .collect()
}
