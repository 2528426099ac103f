//! Shared helpers for integration tests.

use bytes::Bytes;

use ndtiff::{Axes, AxisValue, NDTiffStorage, StorageConfig};

/// Build a coordinate from name/value pairs.
pub fn axes_of(pairs: &[(&str, AxisValue)]) -> Axes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// A coordinate with a single integer axis.
pub fn time_axes(t: i32) -> Axes {
    axes_of(&[("time", AxisValue::I32(t))])
}

/// A coordinate holding only the reserved tile axes.
pub fn tile_axes(row: i32, col: i32) -> Axes {
    axes_of(&[
        ("row", AxisValue::I32(row)),
        ("column", AxisValue::I32(col)),
    ])
}

/// Row-major 16-bit ramp pixels (native byte order).
pub fn gray16_ramp(len: u16) -> Bytes {
    let mut bytes = Vec::with_capacity(len as usize * 2);
    for v in 0..len {
        bytes.extend_from_slice(&v.to_ne_bytes());
    }
    Bytes::from(bytes)
}

/// Constant-valued 8-bit pixels.
pub fn gray8_fill(value: u8, count: usize) -> Bytes {
    Bytes::from(vec![value; count])
}

/// Create a writable non-tiled dataset with default configuration.
pub fn create_simple(dir: &std::path::Path, prefix: &str) -> NDTiffStorage {
    NDTiffStorage::create(
        dir,
        prefix,
        serde_json::json!({}),
        false,
        0,
        0,
        StorageConfig::default(),
    )
    .unwrap()
}

/// Create a writable tiled dataset with the given overlap and
/// pyramid depth.
pub fn create_tiled(
    dir: &std::path::Path,
    x_overlap: u32,
    y_overlap: u32,
    max_level: Option<u32>,
) -> NDTiffStorage {
    NDTiffStorage::create(
        dir,
        "tiles",
        serde_json::json!({}),
        true,
        x_overlap,
        y_overlap,
        StorageConfig {
            max_resolution_level: max_level,
            ..Default::default()
        },
    )
    .unwrap()
}
