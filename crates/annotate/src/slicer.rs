//! Overlapping-tile inference for images much larger than the network input.

use crate::config::SlicerConfig;
use crate::detection::{RawDetection, non_max_suppression};
use crate::error::AnnotateError;
use common::span;
use image::RgbImage;
use image::imageops;

/// Rectangle of the source image fed to the detector as one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    fn covers(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width == width && self.height == height
    }
}

fn axis_origins(extent: u32, tile: u32, overlap_ratio: f32) -> Vec<u32> {
    if extent <= tile {
        return vec![0];
    }

    let overlap = (tile as f32 * overlap_ratio) as u32;
    let step = tile.saturating_sub(overlap).max(1);

    let mut origins = Vec::new();
    let mut origin = 0;
    loop {
        if origin + tile >= extent {
            // Last tile is pulled back to end on the border at full size.
            origins.push(extent - tile);
            break;
        }
        origins.push(origin);
        origin += step;
    }
    origins.dedup();
    origins
}

/// Tiles covering a `width` x `height` image row by row. Neighbouring tiles
/// share `overlap_ratio` of the tile size; tiles never extend past the border.
pub fn tile_grid(width: u32, height: u32, config: &SlicerConfig) -> Vec<Tile> {
    let tile_w = config.tile_width.min(width);
    let tile_h = config.tile_height.min(height);

    let xs = axis_origins(width, tile_w, config.overlap_ratio);
    let ys = axis_origins(height, tile_h, config.overlap_ratio);

    ys.iter()
        .flat_map(|&y| {
            xs.iter().map(move |&x| Tile {
                x,
                y,
                width: tile_w,
                height: tile_h,
            })
        })
        .collect()
}

/// Runs `infer` on every tile, maps detections back into the full image frame
/// and merges duplicates across overlaps with one suppression pass.
///
/// An image that fits inside a single tile is passed through whole and its
/// detections are returned without suppression.
#[tracing::instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn slice_and_infer<F>(
    image: &RgbImage,
    config: &SlicerConfig,
    mut infer: F,
) -> Result<Vec<RawDetection>, AnnotateError>
where
    F: FnMut(&RgbImage) -> Result<Vec<RawDetection>, AnnotateError>,
{
    config.validate().map_err(AnnotateError::Configuration)?;

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(Vec::new());
    }

    let tiles = tile_grid(width, height, config);
    if tiles.len() == 1 && tiles[0].covers(width, height) {
        tracing::debug!("Image fits in one tile");
        return infer(image);
    }

    tracing::debug!(tiles = tiles.len(), "Slicing image");
    let mut merged = Vec::new();
    for tile in &tiles {
        let _s = span!("tile");
        let crop = imageops::crop_imm(image, tile.x, tile.y, tile.width, tile.height).to_image();

        let detections = infer(&crop)?;
        tracing::trace!(?tile, found = detections.len(), "Tile done");

        merged.extend(detections.into_iter().map(|det| RawDetection {
            bbox: det
                .bbox
                .translated(tile.x as f32, tile.y as f32, tile.width, tile.height),
            ..det
        }));
    }

    let before = merged.len();
    let kept = non_max_suppression(
        merged,
        config.iou_threshold,
        config.class_agnostic,
        width,
        height,
    );
    tracing::debug!(before, after = kept.len(), "Merged tile detections");
    Ok(kept)
}
