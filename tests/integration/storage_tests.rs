//! Core storage round-trips and admission checks.

use bytes::Bytes;
use ndtiff::{serialize_axes, AxisValue, NDTiffStorage, StorageError};

use super::test_utils::{axes_of, create_simple, gray16_ramp, time_axes};

#[test]
fn test_single_image_round_trip_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s1");

    // 16x16 16-bit image whose samples are the row-major ramp 0..255
    let pixels = gray16_ramp(256);
    let handle = storage
        .put_image(
            pixels.clone(),
            serde_json::json!({"Exposure": 5}),
            time_axes(0),
            false,
            16,
            16,
            16,
        )
        .unwrap();
    let entry = handle.wait().unwrap();
    assert_eq!(entry.pix_width, 16);
    assert_eq!(entry.pix_height, 16);

    // Visible through the live writer before finish
    let image = storage.get_image(&time_axes(0)).unwrap().unwrap();
    assert_eq!(&image.pixels[..], &pixels[..]);

    storage.finished_writing().unwrap();
    assert_eq!(storage.image_bounds(), Some([0, 0, 16, 16]));

    // A fresh loader sees the identical bytes and metadata
    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    let image = reloaded.get_image(&time_axes(0)).unwrap().unwrap();
    assert_eq!(&image.pixels[..], &pixels[..]);
    assert_eq!(image.metadata["Exposure"], 5);
    assert_eq!(reloaded.image_bounds(), Some([0, 0, 16, 16]));
    assert!(!reloaded.is_tiled());
}

#[test]
fn test_axis_type_conflict_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s2");

    storage
        .put_image(
            Bytes::from(vec![0u8; 16]),
            serde_json::json!({}),
            time_axes(0),
            false,
            8,
            4,
            4,
        )
        .unwrap()
        .wait()
        .unwrap();

    // The same axis may not switch to string values
    let result = storage.put_image(
        Bytes::from(vec![0u8; 16]),
        serde_json::json!({}),
        axes_of(&[("time", AxisValue::Str("zero".to_string()))]),
        false,
        8,
        4,
        4,
    );
    assert!(matches!(
        result,
        Err(StorageError::AxisTypeConflict { .. })
    ));

    storage.finished_writing().unwrap();
}

#[test]
fn test_write_after_finish_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s3");
    storage
        .put_image(
            Bytes::from(vec![0u8; 16]),
            serde_json::json!({}),
            time_axes(0),
            false,
            8,
            4,
            4,
        )
        .unwrap()
        .wait()
        .unwrap();
    storage.finished_writing().unwrap();

    let result = storage.put_image(
        Bytes::from(vec![1u8; 16]),
        serde_json::json!({}),
        time_axes(1),
        false,
        8,
        4,
        4,
    );
    assert!(matches!(result, Err(StorageError::DatasetFinished)));
}

#[test]
fn test_sixteen_bit_rgb_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s4");

    let result = storage.put_image(
        Bytes::from(vec![0u8; 4 * 4 * 4]),
        serde_json::json!({}),
        time_axes(0),
        true,
        16,
        4,
        4,
    );
    assert!(matches!(
        result,
        Err(StorageError::UnsupportedPixelFormat {
            bit_depth: 16,
            rgb: true
        })
    ));
    storage.finished_writing().unwrap();
}

#[test]
fn test_rgb_round_trip_zeroes_alpha() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s5");

    // 2x1 packed B, G, R, A pixels
    let pixels = Bytes::from(vec![10u8, 20, 30, 99, 40, 50, 60, 99]);
    storage
        .put_image(
            pixels,
            serde_json::json!({}),
            time_axes(0),
            true,
            8,
            1,
            2,
        )
        .unwrap()
        .wait()
        .unwrap();
    storage.finished_writing().unwrap();

    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    let image = reloaded.get_image(&time_axes(0)).unwrap().unwrap();
    assert_eq!(&image.pixels[..], &[10, 20, 30, 0, 40, 50, 60, 0]);
}

#[test]
fn test_pixel_buffer_length_validated() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s6");

    let result = storage.put_image(
        Bytes::from(vec![0u8; 10]), // should be 16 for 4x4 8-bit
        serde_json::json!({}),
        time_axes(0),
        false,
        8,
        4,
        4,
    );
    assert!(matches!(result, Err(StorageError::PixelBufferSize { .. })));
    storage.finished_writing().unwrap();
}

#[test]
fn test_absent_coordinate_returns_none() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s7");
    assert!(storage.get_image(&time_axes(42)).unwrap().is_none());
    assert!(!storage.has_image(&time_axes(42), 0));
    storage.finished_writing().unwrap();
}

#[test]
fn test_canonical_axes_serialization() {
    let axes = axes_of(&[
        ("z", AxisValue::I32(3)),
        ("time", AxisValue::I32(1)),
        ("channel", AxisValue::Str("GFP".to_string())),
    ]);
    assert_eq!(
        serialize_axes(&axes),
        r#"{"channel":"GFP","time":1,"z":3}"#
    );
}

#[test]
fn test_display_settings_written_and_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s8");
    storage
        .put_image(
            Bytes::from(vec![0u8; 16]),
            serde_json::json!({}),
            time_axes(0),
            false,
            8,
            4,
            4,
        )
        .unwrap()
        .wait()
        .unwrap();
    storage.set_display_settings(serde_json::json!({"contrast": [0, 4096]}));
    storage.finished_writing().unwrap();

    assert!(dir.path().join("display_settings.txt").exists());
    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    assert_eq!(
        reloaded.display_settings().unwrap()["contrast"][1],
        4096
    );
}

#[test]
fn test_summary_metadata_annotated_with_reserved_keys() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s9");
    assert_eq!(storage.summary_metadata()["TiledImageStorage"], false);
    storage.finished_writing().unwrap();

    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    assert_eq!(reloaded.summary_metadata()["TiledImageStorage"], false);
}

#[test]
fn test_empty_prefix_yields_bare_stack_filename() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "");
    let entry = storage
        .put_image(
            Bytes::from(vec![0u8; 16]),
            serde_json::json!({}),
            time_axes(0),
            false,
            8,
            4,
            4,
        )
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(entry.filename, "NDTiffStack.tif");
    storage.finished_writing().unwrap();
    assert!(dir.path().join("NDTiffStack.tif").exists());
}

#[test]
fn test_many_images_all_resolve_after_finish() {
    let dir = tempfile::tempdir().unwrap();
    let storage = create_simple(dir.path(), "s10");

    let handles: Vec<_> = (0..20)
        .map(|t| {
            storage
                .put_image(
                    Bytes::from(vec![t as u8; 64]),
                    serde_json::json!({"t": t}),
                    time_axes(t),
                    false,
                    8,
                    8,
                    8,
                )
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.wait().unwrap();
    }
    storage.finished_writing().unwrap();

    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    assert_eq!(reloaded.axes_set().len(), 20);
    for t in 0..20 {
        let image = reloaded.get_image(&time_axes(t)).unwrap().unwrap();
        assert_eq!(image.pixels[0], t as u8);
        assert_eq!(image.metadata["t"], t);
    }
}
