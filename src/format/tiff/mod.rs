//! The NDTiff container: a TIFF-compatible file extended with an
//! identifying discriminator and an embedded summary-metadata block.
//!
//! # Extended Header (28 bytes)
//!
//! ```text
//! Bytes 0-1:   Byte order (0x4949 = "II" little, 0x4D4D = "MM" big)
//! Bytes 2-3:   TIFF version (42)
//! Bytes 4-7:   Offset of the first IFD
//! Bytes 8-11:  NDTiff discriminator (483729)
//! Bytes 12-15: Major version
//! Bytes 16-19: Minor version
//! Bytes 20-23: Summary-metadata header magic (2355492)
//! Bytes 24-27: Summary-metadata length K
//! Bytes 28..:  Summary metadata (UTF-8 JSON), then a pad byte if
//!              needed so the first IFD starts on an even offset
//! ```
//!
//! After the header come IFD + pixel + metadata triples; the final
//! IFD's next-IFD pointer is zeroed on finish. Standard TIFF tools
//! can read a finished container as a plain multi-page TIFF; the
//! discriminator distinguishes NDTiff datasets from legacy
//! multi-page files.

pub mod reader;
pub mod tags;
pub mod writer;

pub use reader::TiffReader;
pub use writer::TiffWriter;

/// TIFF identifier code (bytes 2-3).
pub const TIFF_VERSION: u16 = 42;

/// Discriminator marking an NDTiff container (bytes 8-11).
pub const NDTIFF_MARKER: u32 = 483729;

/// Current major format version.
pub const MAJOR_VERSION: u32 = 3;

/// Current minor format version.
pub const MINOR_VERSION: u32 = 3;

/// Magic preceding the summary-metadata length (bytes 20-23).
pub const SUMMARY_MD_HEADER: u32 = 2355492;

/// Size of the extended header in bytes.
pub const HEADER_SIZE: u64 = 28;

/// Hard ceiling on a container file's size (the 4 GiB TIFF limit).
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;
