//! Stitched sub-image reader.
//!
//! Composites an arbitrary pixel window at any pyramid level from the
//! tiles that cover it. The output columns are partitioned into
//! contiguous runs that share a source-tile column (and likewise for
//! rows); each (row-run, column-run) rectangle is then copied from
//! its tile in one strided pass. Window coordinates may be negative;
//! missing tiles leave their rectangle as background zeros.
//!
//! The output buffer's pixel format is taken from the first populated
//! tile; a later tile that disagrees aborts the composite.

use bytes::BytesMut;

use crate::error::StorageError;
use crate::format::{EssentialMetadata, TaggedImage};

// =============================================================================
// Run Partitioning
// =============================================================================

/// Contiguous runs of output pixels sharing one source tile index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPartition {
    /// Tile index of the first run.
    pub start_tile: i64,
    /// Output pixels covered by each consecutive tile.
    pub lengths: Vec<u32>,
}

/// The tile index covering a pixel coordinate. Tile -1 covers pixels
/// `-tile_dim..0`, so the highest pixel of tile -1 is -1.
pub fn tile_index(pixel: i64, tile_dim: u32) -> i64 {
    pixel.div_euclid(tile_dim as i64)
}

/// Partition `extent` output pixels starting at `start` into runs per
/// source tile.
pub fn partition_runs(start: i64, extent: u32, tile_dim: u32) -> RunPartition {
    let start_tile = tile_index(start, tile_dim);
    let mut lengths = Vec::new();
    let mut previous = start_tile - 1;

    for pixel in start..start + extent as i64 {
        let tile = tile_index(pixel, tile_dim);
        if tile != previous {
            lengths.push(0);
        }
        *lengths.last_mut().expect("pushed above") += 1;
        previous = tile;
    }

    RunPartition {
        start_tile,
        lengths,
    }
}

// =============================================================================
// Compositing
// =============================================================================

/// Geometry of one stitched read.
#[derive(Debug, Clone, Copy)]
pub struct StitchWindow {
    /// Leftmost output pixel in level coordinates; may be negative.
    pub x: i64,
    /// Topmost output pixel in level coordinates; may be negative.
    pub y: i64,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Tile width without overlap.
    pub tile_width: u32,
    /// Tile height without overlap.
    pub tile_height: u32,
    /// Row stride of level-0 tiles (the full-resolution tile width
    /// including overlap).
    pub full_res_tile_width: u32,
    /// Horizontal overlap of full-resolution tiles.
    pub x_overlap: u32,
    /// Vertical overlap of full-resolution tiles.
    pub y_overlap: u32,
    /// Pyramid level being read; level 0 applies the overlap offset.
    pub level: u32,
}

/// Composite a window from tiles supplied by `fetch_tile(row, col)`.
///
/// Absent tiles (`None`) and tiles with empty pixel payloads (reads
/// racing a concurrent writer) leave background zeros. The metadata
/// of the first populated tile becomes the output metadata. If no
/// tile is populated the result has empty pixels and null metadata.
pub fn stitch<F>(window: &StitchWindow, mut fetch_tile: F) -> Result<TaggedImage, StorageError>
where
    F: FnMut(i64, i64) -> Result<Option<(TaggedImage, EssentialMetadata)>, StorageError>,
{
    let col_runs = partition_runs(window.x, window.width, window.tile_width);
    let row_runs = partition_runs(window.y, window.height, window.tile_height);

    let width = window.width as usize;
    let mut pixels: Option<BytesMut> = None;
    let mut format: Option<(bool, u32)> = None; // (rgb, byte_depth)
    let mut metadata: Option<serde_json::Value> = None;

    let mut x_offset = 0usize;
    for (col_i, &run_width) in col_runs.lengths.iter().enumerate() {
        let col = col_runs.start_tile + col_i as i64;

        let mut y_offset = 0usize;
        for (row_i, &run_height) in row_runs.lengths.iter().enumerate() {
            let row = row_runs.start_tile + row_i as i64;

            let Some((tile, essential)) = fetch_tile(row, col)? else {
                y_offset += run_height as usize;
                continue;
            };
            if tile.pixels.is_empty() {
                // Racing read across a file boundary; leave background
                y_offset += run_height as usize;
                continue;
            }

            let tile_format = (essential.rgb, if essential.rgb { 1 } else { essential.bit_depth.div_ceil(8) });
            match format {
                None => format = Some(tile_format),
                Some(f) if f != tile_format => return Err(StorageError::MixedTileFormats),
                Some(_) => {}
            }
            let (rgb, byte_depth) = tile_format;
            let channels = if rgb { 4 } else { 1 };
            let stride = channels * byte_depth as usize;

            let out = pixels.get_or_insert_with(|| {
                BytesMut::zeroed(width * window.height as usize * stride)
            });
            if metadata.is_none() {
                metadata = Some(tile.metadata.clone());
            }

            // Source row stride differs at level 0, where tiles carry
            // the overlap margin
            let tile_row_stride = if window.level == 0 {
                window.full_res_tile_width as usize
            } else {
                window.tile_width as usize
            };

            for line in y_offset..y_offset + run_height as usize {
                let mut tile_y =
                    (window.y + line as i64).rem_euclid(window.tile_height as i64) as usize;
                let mut tile_x =
                    (window.x + x_offset as i64).rem_euclid(window.tile_width as i64) as usize;
                if window.level == 0 {
                    tile_y += window.y_overlap as usize / 2;
                    tile_x += window.x_overlap as usize / 2;
                }

                let src_start = (tile_y * tile_row_stride + tile_x) * stride;
                let src_end = src_start + run_width as usize * stride;
                let dst_start = (line * width + x_offset) * stride;
                let dst_end = dst_start + run_width as usize * stride;

                if src_end > tile.pixels.len() || dst_end > out.len() {
                    continue;
                }
                out[dst_start..dst_end].copy_from_slice(&tile.pixels[src_start..src_end]);
            }
            y_offset += run_height as usize;
        }
        x_offset += run_width as usize;
    }

    Ok(TaggedImage::new(
        pixels.map(BytesMut::freeze).unwrap_or_default(),
        metadata.unwrap_or(serde_json::Value::Null),
    ))
}

// =============================================================================
// Tests
// =============================================================================
