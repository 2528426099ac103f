//! On-disk format: axes keys, the index record schema, and the
//! TIFF-compatible container layout.

pub mod axes;
pub mod index;
pub mod tiff;

use bytes::Bytes;

// Re-export the format-level vocabulary types
pub use axes::{
    axes_at_tile, deserialize_axes, serialize_axes, AxisKind, AxisValue, Axes, COL_AXIS, ROW_AXIS,
};
pub use index::{
    read_index_map, EssentialMetadata, IndexEntry, PixelType, INDEX_FILE_NAME, UNCOMPRESSED,
};

/// An image as handed across the storage API: a pixel buffer plus its
/// structured metadata.
///
/// Pixel layout follows the pixel type: 1 byte per pixel for 8-bit
/// mono, 2 bytes (native order) for deeper mono, and 4 bytes per
/// pixel for RGB.
#[derive(Debug, Clone)]
pub struct TaggedImage {
    /// Raw pixel bytes.
    pub pixels: Bytes,

    /// Per-image metadata, opaque to the engine.
    pub metadata: serde_json::Value,
}

impl TaggedImage {
    /// Bundle pixels with their metadata.
    pub fn new(pixels: Bytes, metadata: serde_json::Value) -> Self {
        Self { pixels, metadata }
    }
}
