//! Container rollover across the file size cap.

use bytes::Bytes;
use ndtiff::{NDTiffStorage, StorageConfig};

use super::test_utils::time_axes;

/// A cap just above the writer's 5 MB safety padding, so a handful of
/// 256 KiB images force a roll.
const SMALL_CAP: u64 = 5_600_000;

#[test]
fn test_rollover_produces_second_file_and_all_images_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let storage = NDTiffStorage::create(
        dir.path(),
        "acq",
        serde_json::json!({}),
        false,
        0,
        0,
        StorageConfig {
            container_size_cap: Some(SMALL_CAP),
            ..Default::default()
        },
    )
    .unwrap();

    let pixels = Bytes::from(vec![7u8; 256 * 1024]); // 512x512 8-bit
    let mut filenames = Vec::new();
    for t in 0..5 {
        let entry = storage
            .put_image(
                pixels.clone(),
                serde_json::json!({"t": t}),
                time_axes(t),
                false,
                8,
                512,
                512,
            )
            .unwrap()
            .wait()
            .unwrap();
        filenames.push(entry.filename);
    }
    storage.finished_writing().unwrap();

    assert!(dir.path().join("acq_NDTiffStack.tif").exists());
    assert!(dir.path().join("acq_NDTiffStack_1.tif").exists());
    assert!(filenames.contains(&"acq_NDTiffStack.tif".to_string()));
    assert!(filenames.contains(&"acq_NDTiffStack_1.tif".to_string()));

    // Every image resolves from a fresh loader, whichever file it
    // landed in
    let reloaded = NDTiffStorage::open(dir.path()).unwrap();
    for t in 0..5 {
        let image = reloaded.get_image(&time_axes(t)).unwrap().unwrap();
        assert_eq!(image.pixels.len(), 256 * 1024);
        assert_eq!(image.metadata["t"], t);
    }
}

#[test]
fn test_rolled_files_truncated_below_cap() {
    let dir = tempfile::tempdir().unwrap();
    let storage = NDTiffStorage::create(
        dir.path(),
        "acq",
        serde_json::json!({}),
        false,
        0,
        0,
        StorageConfig {
            container_size_cap: Some(SMALL_CAP),
            ..Default::default()
        },
    )
    .unwrap();

    let pixels = Bytes::from(vec![1u8; 256 * 1024]);
    for t in 0..5 {
        storage
            .put_image(
                pixels.clone(),
                serde_json::json!({}),
                time_axes(t),
                false,
                8,
                512,
                512,
            )
            .unwrap()
            .wait()
            .unwrap();
    }
    storage.finished_writing().unwrap();

    for entry in std::fs::read_dir(dir.path()).unwrap().flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(".tif") {
            let len = entry.metadata().unwrap().len();
            assert!(len <= SMALL_CAP, "{name:?} is {len} bytes");
        }
    }
}
