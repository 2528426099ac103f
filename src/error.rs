use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while reading or writing an NDTiff container file.
#[derive(Debug, Error)]
pub enum TiffError {
    /// First two bytes were neither `II` nor `MM`
    #[error("invalid TIFF byte order marker: 0x{0:04x}")]
    InvalidMagic(u16),

    /// TIFF identifier code was not 42
    #[error("invalid TIFF version: {0} (expected 42)")]
    InvalidVersion(u16),

    /// The NDTiff discriminator at bytes 8-11 was missing
    #[error("not an NDTiff file: discriminator was {0} (expected 483729)")]
    MissingNdTiffMarker(u32),

    /// Summary-metadata header magic did not match
    #[error("summary metadata header incorrect: found {found} (expected {expected})")]
    SummaryHeaderMismatch { expected: u32, found: u32 },

    /// File ended before a complete structure could be read
    #[error("file too small: required {required} bytes, found {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Summary metadata was not valid UTF-8 JSON
    #[error("couldn't parse summary metadata: {0}")]
    InvalidSummaryMetadata(#[source] serde_json::Error),

    /// Per-image metadata was not valid UTF-8 JSON
    #[error("couldn't parse image metadata: {0}")]
    InvalidImageMetadata(#[source] serde_json::Error),

    /// Preallocating the container failed, typically from a full disk
    #[error("insufficient space on disk to preallocate {}: {source}", path.display())]
    Preallocate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Underlying file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the `NDTiff.index` codec and the axes codec.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index file ended mid-entry
    #[error("truncated index entry at byte {offset}")]
    TruncatedEntry { offset: u64 },

    /// An axes key or filename field was not valid UTF-8
    #[error("index entry contains invalid UTF-8 at byte {offset}")]
    InvalidUtf8 { offset: u64 },

    /// A pixel-type code outside the defined table
    #[error("unknown pixel type code: {0}")]
    UnknownPixelType(u32),

    /// An axes key that did not parse as a JSON object
    #[error("couldn't parse axes key: {0}")]
    InvalidAxesJson(#[source] serde_json::Error),

    /// An axis whose value was neither an integer nor a string
    #[error("axis {axis:?} has a non-scalar value")]
    NonScalarAxisValue { axis: String },

    /// Underlying file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the storage engine itself.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Write attempted after `finished_writing`
    #[error("tried to write image to a finished dataset")]
    DatasetFinished,

    /// An axis switched between integer and string values
    #[error("can't mix string and integer values along axis {axis:?}")]
    AxisTypeConflict { axis: String },

    /// A tiled write without the reserved `row`/`column` axes
    #[error("axes must contain row and column for a tiled dataset")]
    MissingTileAxes,

    /// A `(bit depth, rgb)` pair outside the pixel-type table; in
    /// particular 16-bit RGB is unsupported
    #[error("unsupported pixel format: {bit_depth}-bit, rgb = {rgb}")]
    UnsupportedPixelFormat { bit_depth: u32, rgb: bool },

    /// The pixel buffer does not match the declared dimensions
    #[error("pixel buffer is {actual} bytes, expected {expected} for the declared dimensions")]
    PixelBufferSize { expected: usize, actual: usize },

    /// Summary metadata must be a JSON object so the engine can
    /// annotate its reserved keys
    #[error("summary metadata must be a JSON object")]
    SummaryNotObject,

    /// Tiled datasets require uniform image dimensions
    #[error("tile size mismatch: dataset uses {expected_width}x{expected_height}, got {width}x{height}")]
    TileSizeMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    /// Stitched reads require every populated tile to share one pixel format
    #[error("tiles with mixed pixel formats in one stitched read")]
    MixedTileFormats,

    /// A previous write on the writer thread failed; the dataset is wedged
    #[error("writing previously failed: {0}")]
    WriterFailed(String),

    /// The writer thread exited before completing a handed-off task
    #[error("writer thread terminated unexpectedly")]
    WriterGone,

    /// The directory did not contain a loadable dataset
    #[error("couldn't open dataset at {}: {reason}", path.display())]
    LoadFailed { path: PathBuf, reason: String },

    /// A configuration value was rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Container-level failure
    #[error(transparent)]
    Tiff(#[from] TiffError),

    /// Index-level failure
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Underlying file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
