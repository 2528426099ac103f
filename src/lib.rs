//! NDTiff - A disk-resident storage engine for N-dimensional image
//! datasets
//!
//! This library stores 2-D rasters keyed by open, user-defined
//! coordinates (for example `{time: 3, channel: "GFP", z: 12}`) in
//! TIFF-compatible container files, with a separate binary index for
//! O(1) random access, a single-writer pipeline sized for
//! acquisition rates that saturate a local SSD, an on-line 2x2
//! resolution pyramid for tiled datasets, and a stitched reader that
//! composites arbitrary windows from tiles at any level.

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod storage;

// Re-export commonly used types
pub use config::{BufferPoolConfig, StorageConfig, DEFAULT_QUEUE_CAPACITY};
pub use error::{IndexError, StorageError, TiffError};
pub use format::axes::{
    axes_at_tile, deserialize_axes, serialize_axes, AxisKind, AxisValue, Axes, COL_AXIS, ROW_AXIS,
};
pub use format::index::{
    read_index_map, EssentialMetadata, IndexEntry, PixelType, INDEX_FILE_NAME,
};
pub use format::tiff::{TiffReader, TiffWriter, MAJOR_VERSION, MINOR_VERSION};
pub use format::TaggedImage;
pub use storage::{
    BufferPool, NDTiffStorage, ResolutionLevel, WriteHandle, DISPLAY_SETTINGS_FILE,
    DOWNSAMPLE_DIR_PREFIX, FULL_RES_DIR,
};
