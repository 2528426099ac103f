//! Stitched window reads over tiled datasets.

use ndtiff::{Axes, NDTiffStorage};

use super::test_utils::{create_tiled, gray8_fill, tile_axes};

/// Put a constant 10x10 8-bit tile (2-pixel overlap margin included)
/// at a grid position.
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
fn test_two_by_two_grid_stitches_into_quadrants() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_tiled(dir.path(), 2, 2, None);

    // Four 10x10 tiles with 2-pixel overlap tile an effective 8x8
    // grid; each is filled with row * 2 + col
    for row in 0..2 {
        for col in 0..2 {
            put_tile(&storage, row, col, (row * 2 + col) as u8);
        }
    }

    let image = storage
        .get_display_image(&Axes::new(), 0, 0, 0, 16, 16)
        .unwrap();
    assert_eq!(image.pixels.len(), 256);

    for y in 0..16usize {
        for x in 0..16usize {
            let expected = ((y / 8) * 2 + x / 8) as u8;
            assert_eq!(image.pixels[y * 16 + x], expected, "at ({x}, {y})");
        }
    }

    storage.finished_writing().unwrap();
}

#[test]
fn test_stitched_window_offset_and_background() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_tiled(dir.path(), 0, 0, None);

    // A single 8x8 tile at the origin, nothing else
    storage
        .put_image_multi_res(
            gray8_fill(9, 64),
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

    // A window hanging off the populated region: the covered part
    // carries tile pixels, the rest stays background zero
    let image = storage
        .get_display_image(&Axes::new(), 0, 4, 4, 8, 8)
        .unwrap();
    assert_eq!(image.pixels[0], 9); // (4, 4) inside the tile
    assert_eq!(image.pixels[7], 0); // (11, 4) past the tile
    assert_eq!(image.pixels[7 * 8], 0); // (4, 11) past the tile

    storage.finished_writing().unwrap();
}

#[test]
fn test_negative_tile_coordinates_stored_and_stitched() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_tiled(dir.path(), 0, 0, None);

    storage
        .put_image_multi_res(
            gray8_fill(5, 64),
            serde_json::json!({}),
            tile_axes(-1, -1),
            false,
            8,
            8,
            8,
        )
        .unwrap()
        .wait()
        .unwrap();

    // Direct retrieval by the negative coordinate
    let image = storage.get_image(&tile_axes(-1, -1)).unwrap().unwrap();
    assert_eq!(image.pixels[0], 5);

    // The window covering pixels -8..0 on both axes is that tile
    let image = storage
        .get_display_image(&Axes::new(), 0, -8, -8, 8, 8)
        .unwrap();
    assert!(image.pixels.iter().all(|&p| p == 5));

    // Bounds span the negative tile
    storage.finished_writing().unwrap();
    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    assert_eq!(reloaded.image_bounds(), Some([-8, -8, 0, 0]));
}

#[test]
fn test_stitched_metadata_comes_from_first_populated_tile() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_tiled(dir.path(), 0, 0, None);

    put_8x8(&storage, 0, 0, 1);
    put_8x8(&storage, 0, 1, 2);

    let image = storage
        .get_display_image(&Axes::new(), 0, 0, 0, 16, 8)
        .unwrap();
    assert_eq!(image.metadata["tile"], 1);

    storage.finished_writing().unwrap();
}

fn put_8x8(storage: &NDTiffStorage, row: i32, col: i32, value: u8) {
    storage
        .put_image_multi_res(
            gray8_fill(value, 64),
            serde_json::json!({"tile": value}),
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
fn test_stitched_read_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = create_tiled(dir.path(), 2, 2, None);
        for row in 0..2 {
            for col in 0..2 {
                put_tile(&storage, row, col, (10 + row * 2 + col) as u8);
            }
        }
        storage.finished_writing().unwrap();
    }

    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    assert!(reloaded.is_tiled());
    let image = reloaded
        .get_display_image(&Axes::new(), 0, 0, 0, 16, 16)
        .unwrap();
    assert_eq!(image.pixels[0], 10);
    assert_eq!(image.pixels[255], 13);
}
