//! TIFF tag and field-type constants used by the container codec.
//!
//! Each image record carries exactly [`ENTRIES_PER_IFD`] directory
//! entries, written in strictly ascending tag order as the TIFF
//! specification requires.

/// Number of directory entries in every IFD this crate writes.
pub const ENTRIES_PER_IFD: u16 = 13;

// =============================================================================
// Tags
// =============================================================================

/// ImageWidth (LONG).
pub const WIDTH: u16 = 256;

/// ImageLength (LONG).
pub const HEIGHT: u16 = 257;

/// BitsPerSample (SHORT; inline for mono, offset to 3 SHORTs for RGB).
pub const BITS_PER_SAMPLE: u16 = 258;

/// Compression (SHORT; always 1 = uncompressed).
pub const COMPRESSION: u16 = 259;

/// PhotometricInterpretation (SHORT; 1 = greyscale, 2 = RGB).
pub const PHOTOMETRIC_INTERPRETATION: u16 = 262;

/// StripOffsets (LONG; offset of the pixel payload).
pub const STRIP_OFFSETS: u16 = 273;

/// SamplesPerPixel (SHORT; 1 or 3).
pub const SAMPLES_PER_PIXEL: u16 = 277;

/// RowsPerStrip (SHORT; the image is one strip).
pub const ROWS_PER_STRIP: u16 = 278;

/// StripByteCounts (LONG; pixel payload length).
pub const STRIP_BYTE_COUNTS: u16 = 279;

/// XResolution (RATIONAL).
pub const X_RESOLUTION: u16 = 282;

/// YResolution (RATIONAL).
pub const Y_RESOLUTION: u16 = 283;

/// ResolutionUnit (SHORT; 3 = centimetre).
pub const RESOLUTION_UNIT: u16 = 296;

/// MicroManagerMetadata (ASCII; the per-image metadata JSON).
pub const MM_METADATA: u16 = 51123;

// =============================================================================
// Field Types
// =============================================================================

/// ASCII field type.
pub const TYPE_ASCII: u16 = 2;

/// SHORT (16-bit) field type.
pub const TYPE_SHORT: u16 = 3;

/// LONG (32-bit) field type.
pub const TYPE_LONG: u16 = 4;

/// RATIONAL (two LONGs) field type.
pub const TYPE_RATIONAL: u16 = 5;
