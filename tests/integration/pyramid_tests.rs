//! Resolution pyramid construction and consistency.

use ndtiff::{Axes, NDTiffStorage};

use super::test_utils::{create_tiled, gray8_fill, tile_axes};

/// Put a constant 10x10 tile (2-pixel overlap margin included).
fn put_tile(storage: &NDTiffStorage, row: i32, col: i32, value: u8) {
    storage
        .put_image_multi_res(
            gray8_fill(value, 100),
            serde_json::json!({"tile": value}),
            tile_axes(row, col),
            false,
            8,
            10,
            10,
        )
        .unwrap()
        .wait()
        .unwrap();
}

#[test]
fn test_level_one_tile_quadrants_average_source_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_tiled(dir.path(), 2, 2, Some(1));

    for row in 0..2 {
        for col in 0..2 {
            put_tile(&storage, row, col, (row * 2 + col) as u8);
        }
    }
    storage.finished_writing().unwrap();

    // The four 8x8 source tiles collapse into one 8x8 level-1 tile;
    // averaging a constant tile leaves its constant, so each 4x4
    // quadrant carries its source tile's value
    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    assert_eq!(reloaded.num_res_levels(), 2);

    let tile = reloaded
        .get_image_at_level(&tile_axes(0, 0), 1)
        .unwrap()
        .unwrap();
    assert_eq!(tile.pixels.len(), 64);
    for y in 0..8usize {
        for x in 0..8usize {
            let expected = ((y / 4) * 2 + x / 4) as u8;
            assert_eq!(tile.pixels[y * 8 + x], expected, "at ({x}, {y})");
        }
    }
}

#[test]
fn test_partial_grid_leaves_unwritten_quadrants_zero() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_tiled(dir.path(), 0, 0, Some(1));

    // Only the top row of the 2x2 block arrives
    storage
        .put_image_multi_res(
            gray8_fill(40, 64),
            serde_json::json!({}),
            tile_axes(0, 0),
            false,
            8,
            8,
            8,
        )
        .unwrap()
        .wait()
        .unwrap();
    storage
        .put_image_multi_res(
            gray8_fill(80, 64),
            serde_json::json!({}),
            tile_axes(0, 1),
            false,
            8,
            8,
            8,
        )
        .unwrap()
        .wait()
        .unwrap();
    storage.finished_writing().unwrap();

    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    let tile = reloaded
        .get_image_at_level(&tile_axes(0, 0), 1)
        .unwrap()
        .unwrap();

    assert_eq!(tile.pixels[0], 40); // top-left quadrant
    assert_eq!(tile.pixels[7], 80); // top-right quadrant
    assert_eq!(tile.pixels[7 * 8], 0); // bottom never arrived
}

#[test]
fn test_two_levels_coarsen_consistently() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_tiled(dir.path(), 0, 0, Some(2));

    // A 4x4 grid of constant tiles: level 2 should collapse it to a
    // single tile whose quadrants average 2x2 blocks of tile values
    for row in 0..4 {
        for col in 0..4 {
            put_tile_no_overlap(&storage, row, col, (row * 4 + col) as u8 * 4);
        }
    }
    storage.finished_writing().unwrap();

    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    assert_eq!(reloaded.num_res_levels(), 3);

    // Level 1 holds 2x2 tiles; check tile (0, 0)'s quadrants
    let level1 = reloaded
        .get_image_at_level(&tile_axes(0, 0), 1)
        .unwrap()
        .unwrap();
    assert_eq!(level1.pixels[0], 0); // source tile (0,0) = 0
    assert_eq!(level1.pixels[7], 4); // source tile (0,1) = 4

    // Level 2's single tile: its top-left 4x4 quadrant is level-1
    // tile (0, 0) shrunk in half, so each full-resolution tile's
    // constant occupies a 2x2 patch
    let level2 = reloaded
        .get_image_at_level(&tile_axes(0, 0), 2)
        .unwrap()
        .unwrap();
    assert_eq!(level2.pixels[0], 0); // from tile (0,0)
    assert_eq!(level2.pixels[2], 4); // from tile (0,1)
    assert_eq!(level2.pixels[2 * 8], 16); // from tile (1,0)
    assert_eq!(level2.pixels[2 * 8 + 2], 20); // from tile (1,1)
}

fn put_tile_no_overlap(storage: &NDTiffStorage, row: i32, col: i32, value: u8) {
    storage
        .put_image_multi_res(
            gray8_fill(value, 64),
            serde_json::json!({}),
            tile_axes(row, col),
            false,
            8,
            8,
            8,
        )
        .unwrap()
        .wait()
        .unwrap();
}

#[test]
fn test_increase_max_resolution_level_backfills() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_tiled(dir.path(), 0, 0, None);

    // Written with no pyramid at all
    for row in 0..2 {
        for col in 0..2 {
            put_tile_no_overlap(&storage, row, col, (row * 2 + col) as u8 * 10);
        }
    }
    assert_eq!(storage.num_res_levels(), 1);

    // Growing the pyramid re-downsamples every existing tile
    storage.increase_max_resolution_level(1).unwrap();
    storage.finished_writing().unwrap();

    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    assert_eq!(reloaded.num_res_levels(), 2);
    let tile = reloaded
        .get_image_at_level(&tile_axes(0, 0), 1)
        .unwrap()
        .unwrap();
    assert_eq!(tile.pixels[0], 0);
    assert_eq!(tile.pixels[7], 10);
    assert_eq!(tile.pixels[7 * 8], 20);
    assert_eq!(tile.pixels[63], 30);
}

#[test]
fn test_display_image_at_level_one() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_tiled(dir.path(), 0, 0, Some(1));

    for row in 0..2 {
        for col in 0..2 {
            put_tile_no_overlap(&storage, row, col, 100 + (row * 2 + col) as u8);
        }
    }
    storage.finished_writing().unwrap();

    // The level-1 window over the collapsed tile shows all four
    // quadrant constants
    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    let image = reloaded
        .get_display_image(&Axes::new(), 1, 0, 0, 8, 8)
        .unwrap();
    assert_eq!(image.pixels[0], 100);
    assert_eq!(image.pixels[7], 101);
    assert_eq!(image.pixels[7 * 8], 102);
    assert_eq!(image.pixels[63], 103);
}
