//! 2x2 averaging kernel for the resolution pyramid.
//!
//! Each full-resolution tile that arrives is folded into every
//! coarser level: the tile is shrunk by half along each axis and
//! written into one quadrant of the destination tile, the quadrant
//! chosen by the parity of the tile's row and column at the previous
//! level.
//!
//! Averaging rules:
//! - each output pixel is the rounded mean of the up-to-four source
//!   pixels of its 2x2 block; at the bottom/right edge of an
//!   odd-sized tile only the available one to three pixels
//!   contribute;
//! - when downsampling from level 0 to level 1, source coordinates
//!   are offset by half the overlap so the overlap margin is excluded
//!   from all coarser levels;
//! - RGB averages each of the four channels independently.

/// Geometry shared by every downsampling step of one dataset.
#[derive(Debug, Clone, Copy)]
pub struct DownsampleGeometry {
    /// Tile width without overlap (the size of pyramid tiles).
    pub tile_width: u32,
    /// Tile height without overlap.
    pub tile_height: u32,
    /// Full-resolution tile width including the overlap margin.
    pub full_res_tile_width: u32,
    /// Full-resolution tile height including the overlap margin.
    pub full_res_tile_height: u32,
    /// Horizontal overlap between neighbouring full-resolution tiles.
    pub x_overlap: u32,
    /// Vertical overlap between neighbouring full-resolution tiles.
    pub y_overlap: u32,
}

/// Fold `src` (a tile at level `dest_level - 1`, positioned at
/// `prev_row`/`prev_col` on that level's grid) into the appropriate
/// quadrant of `dest` (the covering tile at `dest_level`).
///
/// Buffers use the in-memory pixel layout: 1 or 2 bytes per sample
/// (`byte_depth`), or 4 bytes per pixel when `rgb`.
#[allow(clippy::too_many_arguments)]
pub fn downsample_into_quadrant(
    dest: &mut [u8],
    src: &[u8],
    prev_row: i32,
    prev_col: i32,
    dest_level: u32,
    rgb: bool,
    byte_depth: u32,
    geometry: DownsampleGeometry,
) {
    let tile_width = geometry.tile_width as usize;
    let tile_height = geometry.tile_height as usize;

    // Which quadrant of the destination tile this source tile feeds
    let x_pos = (prev_col % 2).unsigned_abs() as usize;
    let y_pos = (prev_row % 2).unsigned_abs() as usize;

    // Level 1 reads full-resolution tiles, which carry the overlap
    // margin; deeper levels read already-trimmed pyramid tiles.
    let (prev_width, prev_height, x_offset, y_offset) = if dest_level == 1 {
        (
            geometry.full_res_tile_width as usize,
            geometry.full_res_tile_height as usize,
            geometry.x_overlap as usize / 2,
            geometry.y_overlap as usize / 2,
        )
    } else {
        (tile_width, tile_height, 0, 0)
    };

    let channels = if rgb { 4 } else { 1 };

    let mut y = 0usize;
    while y < tile_height {
        let mut x = 0usize;
        while x < tile_width {
            let px = x + x_offset;
            let py = y + y_offset;

            for comp in 0..channels {
                let mut sum = read_sample(src, (py * prev_width + px) * channels + comp, byte_depth);
                let mut count = 1u32;

                if x < prev_width - 1 && y < prev_height - 1 {
                    // Interior: all four pixels of the block exist
                    count += 3;
                    sum += read_sample(
                        src,
                        ((py + 1) * prev_width + px + 1) * channels + comp,
                        byte_depth,
                    );
                    sum += read_sample(src, (py * prev_width + px + 1) * channels + comp, byte_depth);
                    sum += read_sample(
                        src,
                        ((py + 1) * prev_width + px) * channels + comp,
                        byte_depth,
                    );
                } else if x < prev_width - 1 {
                    // Bottom edge: only the right neighbour exists
                    count += 1;
                    sum += read_sample(src, (py * prev_width + px + 1) * channels + comp, byte_depth);
                } else if y < prev_height - 1 {
                    // Right edge: only the lower neighbour exists
                    count += 1;
                    sum += read_sample(
                        src,
                        ((py + 1) * prev_width + px) * channels + comp,
                        byte_depth,
                    );
                }
                // Bottom-right corner: the single pixel stands alone

                let averaged = (sum + count / 2) / count;
                let dest_index = ((y + y_pos * tile_height) / 2 * tile_width
                    + (x + x_pos * tile_width) / 2)
                    * channels
                    + comp;
                write_sample(dest, dest_index, byte_depth, averaged);
            }
            x += 2;
        }
        y += 2;
    }
}

#[inline]
fn read_sample(buf: &[u8], index: usize, byte_depth: u32) -> u32 {
    if byte_depth == 1 {
        buf[index] as u32
    } else {
        u16::from_ne_bytes([buf[index * 2], buf[index * 2 + 1]]) as u32
    }
}

#[inline]
fn write_sample(buf: &mut [u8], index: usize, byte_depth: u32, value: u32) {
    if byte_depth == 1 {
        buf[index] = value as u8;
    } else {
        let bytes = (value as u16).to_ne_bytes();
        buf[index * 2] = bytes[0];
        buf[index * 2 + 1] = bytes[1];
    }
}

// =============================================================================
// Tests
// =============================================================================
