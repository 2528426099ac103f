//! Container file reader.
//!
//! Opening a container parses and verifies the extended header and
//! reads the summary metadata, nothing else. The reader never walks
//! the IFD chain: the out-of-band index already maps every axes key
//! to exact payload locations, so serving an image is two positional
//! reads.
//!
//! A reader comes in two flavours: one opened over an existing file,
//! and one paired with a live [`super::TiffWriter`], sharing the
//! writer's file handle so images are readable the moment their index
//! entry exists.

use std::fs::File;
use std::path::Path;

use bytes::{Bytes, BytesMut};

use crate::error::TiffError;
use crate::format::index::IndexEntry;
use crate::format::{EssentialMetadata, TaggedImage};
use crate::io::{ByteOrder, SharedFile};

use super::{HEADER_SIZE, NDTIFF_MARKER, SUMMARY_MD_HEADER, TIFF_VERSION};

/// Reader for a single container file.
#[derive(Debug, Clone)]
pub struct TiffReader {
    file: SharedFile,
    order: ByteOrder,
    summary_metadata: serde_json::Value,
    major_version: u32,
    minor_version: u32,
}

impl TiffReader {
    /// Open an existing container read-only, verifying its magics and
    /// loading the summary metadata.
    pub fn open(path: &Path) -> Result<Self, TiffError> {
        let file = SharedFile::new(File::open(path)?);

        let header = file.read_up_to_at(0, HEADER_SIZE as usize)?;
        if header.len() < HEADER_SIZE as usize {
            return Err(TiffError::FileTooSmall {
                required: HEADER_SIZE,
                actual: header.len() as u64,
            });
        }

        // Byte order mark is read before the order is known
        let bom = u16::from_le_bytes([header[0], header[1]]);
        let order = match bom {
            0x4949 => ByteOrder::LittleEndian,
            0x4D4D => ByteOrder::BigEndian,
            other => return Err(TiffError::InvalidMagic(other)),
        };

        let version = order.read_u16(&header[2..]);
        if version != TIFF_VERSION {
            return Err(TiffError::InvalidVersion(version));
        }

        let marker = order.read_u32(&header[8..]);
        if marker != NDTIFF_MARKER {
            return Err(TiffError::MissingNdTiffMarker(marker));
        }
        let major_version = order.read_u32(&header[12..]);
        let minor_version = order.read_u32(&header[16..]);

        let summary_magic = order.read_u32(&header[20..]);
        if summary_magic != SUMMARY_MD_HEADER {
            return Err(TiffError::SummaryHeaderMismatch {
                expected: SUMMARY_MD_HEADER,
                found: summary_magic,
            });
        }

        let summary_len = order.read_u32(&header[24..]) as usize;
        let summary_bytes = file.read_exact_at(HEADER_SIZE, summary_len)?;
        let summary_metadata =
            serde_json::from_slice(&summary_bytes).map_err(TiffError::InvalidSummaryMetadata)?;

        Ok(Self {
            file,
            order,
            summary_metadata,
            major_version,
            minor_version,
        })
    }

    /// Create a reader over a file that is still being written,
    /// reusing the writer's handle and known summary metadata.
    pub fn for_writer(file: SharedFile, summary_metadata: serde_json::Value) -> Self {
        Self {
            file,
            order: ByteOrder::native(),
            summary_metadata,
            major_version: super::MAJOR_VERSION,
            minor_version: super::MINOR_VERSION,
        }
    }

    /// The summary metadata embedded in this container.
    pub fn summary_metadata(&self) -> &serde_json::Value {
        &self.summary_metadata
    }

    /// Format version of the file, `(major, minor)`.
    pub fn version(&self) -> (u32, u32) {
        (self.major_version, self.minor_version)
    }

    /// Read the image an index entry points at.
    ///
    /// A read racing a concurrent writer across a file boundary can
    /// observe a partially-visible payload; this surfaces as empty
    /// pixels with null metadata, which callers treat as "no image".
    pub fn read_image(&self, entry: &IndexEntry) -> Result<TaggedImage, TiffError> {
        let pixel_bytes = entry.pixel_bytes_on_disk() as usize;
        let raw = self.file.read_up_to_at(entry.pix_offset, pixel_bytes)?;
        if raw.len() < pixel_bytes {
            return Ok(TaggedImage::new(Bytes::new(), serde_json::Value::Null));
        }

        let pixels = if entry.pixel_type.is_rgb() {
            expand_rgb(&raw)
        } else {
            raw
        };

        let md_bytes = self
            .file
            .read_exact_at(entry.md_offset, entry.md_length as usize)?;
        let metadata =
            serde_json::from_slice(&md_bytes).map_err(TiffError::InvalidImageMetadata)?;

        Ok(TaggedImage::new(pixels, metadata))
    }

    /// The image properties for an entry, served from the entry alone
    /// without touching the file.
    pub fn essential_metadata(&self, entry: &IndexEntry) -> EssentialMetadata {
        entry.essential_metadata()
    }
}

/// Expand on-disk 3-byte R, G, B pixels back to the in-memory packed
/// B, G, R, A layout with a zeroed alpha channel.
///
/// This is the exact inverse of the writer's repack, so pyramid tiles
/// can be read, re-averaged, and rewritten without channel drift.
fn expand_rgb(raw: &[u8]) -> Bytes {
    let pixel_count = raw.len() / 3;
    let mut out = BytesMut::zeroed(pixel_count * 4);
    for px in 0..pixel_count {
        out[px * 4] = raw[px * 3 + 2];
        out[px * 4 + 1] = raw[px * 3 + 1];
        out[px * 4 + 2] = raw[px * 3];
    }
    out.freeze()
}

// =============================================================================
// Tests
// =============================================================================
