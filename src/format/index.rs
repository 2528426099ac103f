//! Index entry codec.
//!
//! `NDTiff.index` is a flat, append-only log that makes random access
//! into the container files O(1): one fixed-schema record per image,
//! keyed by the canonical axes key. On open, the whole log is read
//! into a map; a lookup then costs one map probe plus one positional
//! read.
//!
//! # Record Layout
//!
//! All numeric fields are 32-bit words in the writing host's native
//! byte order. Offsets are interpreted unsigned, so values at or
//! above 2^31 are legal up to the 4 GiB container cap.
//!
//! ```text
//! u32  axes-key length K
//! K    axes-key (canonical JSON, UTF-8)
//! u32  filename length N
//! N    filename (basename within the dataset directory)
//! u32  pixel offset
//! u32  pixel width
//! u32  pixel height
//! u32  pixel type (see code table below)
//! u32  pixel compression (0 = none)
//! u32  metadata offset
//! u32  metadata length
//! u32  metadata compression (0 = none)
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use bytes::{Bytes, BytesMut};

use crate::error::IndexError;
use crate::io::ByteOrder;

/// Filename of the index within each level directory.
pub const INDEX_FILE_NAME: &str = "NDTiff.index";

/// The only compression code defined.
pub const UNCOMPRESSED: u32 = 0;

// =============================================================================
// PixelType
// =============================================================================

/// Pixel type of one stored image.
///
/// | Code | Meaning     |
/// |------|-------------|
/// | 0    | 8-bit mono  |
/// | 1    | 16-bit mono |
/// | 2    | 8-bit RGB   |
/// | 3    | 10-bit mono |
/// | 4    | 12-bit mono |
/// | 5    | 14-bit mono |
/// | 6    | 11-bit mono |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Gray8,
    Gray16,
    Rgb8,
    Gray10,
    Gray12,
    Gray14,
    Gray11,
}

impl PixelType {
    /// The on-disk code of this pixel type.
    pub fn code(self) -> u32 {
        match self {
            PixelType::Gray8 => 0,
            PixelType::Gray16 => 1,
            PixelType::Rgb8 => 2,
            PixelType::Gray10 => 3,
            PixelType::Gray12 => 4,
            PixelType::Gray14 => 5,
            PixelType::Gray11 => 6,
        }
    }

    /// Decode an on-disk code.
    pub fn from_code(code: u32) -> Result<Self, IndexError> {
        match code {
            0 => Ok(PixelType::Gray8),
            1 => Ok(PixelType::Gray16),
            2 => Ok(PixelType::Rgb8),
            3 => Ok(PixelType::Gray10),
            4 => Ok(PixelType::Gray12),
            5 => Ok(PixelType::Gray14),
            6 => Ok(PixelType::Gray11),
            other => Err(IndexError::UnknownPixelType(other)),
        }
    }

    /// Select the pixel type for a `(bit depth, rgb)` pair.
    ///
    /// Returns `None` for combinations outside the format: any RGB
    /// depth other than 8 (16-bit RGB is unsupported and must fail
    /// rather than corrupt), and mono depths not in the code table.
    pub fn from_bit_depth(bit_depth: u32, rgb: bool) -> Option<Self> {
        if rgb {
            return if bit_depth == 8 {
                Some(PixelType::Rgb8)
            } else {
                None
            };
        }
        match bit_depth {
            8 => Some(PixelType::Gray8),
            10 => Some(PixelType::Gray10),
            11 => Some(PixelType::Gray11),
            12 => Some(PixelType::Gray12),
            14 => Some(PixelType::Gray14),
            16 => Some(PixelType::Gray16),
            _ => None,
        }
    }

    /// Nominal bit depth of a sample.
    pub fn bit_depth(self) -> u32 {
        match self {
            PixelType::Gray8 | PixelType::Rgb8 => 8,
            PixelType::Gray10 => 10,
            PixelType::Gray11 => 11,
            PixelType::Gray12 => 12,
            PixelType::Gray14 => 14,
            PixelType::Gray16 => 16,
        }
    }

    /// Bytes per sample on disk: 1 for 8-bit mono and RGB, 2 for all
    /// deeper mono types.
    pub fn byte_depth(self) -> u32 {
        match self {
            PixelType::Gray8 | PixelType::Rgb8 => 1,
            _ => 2,
        }
    }

    /// Whether this is the packed RGB type.
    pub fn is_rgb(self) -> bool {
        self == PixelType::Rgb8
    }
}

// =============================================================================
// EssentialMetadata
// =============================================================================

/// The image properties recoverable from an index entry alone,
/// without touching the container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EssentialMetadata {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u32,
    pub rgb: bool,
}

// =============================================================================
// IndexEntry
// =============================================================================

/// One record of `NDTiff.index`: where a single image and its
/// metadata live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Canonical axes key of the image.
    pub axes_key: String,

    /// Basename of the container file within the level directory.
    pub filename: String,

    /// Byte offset of the pixel payload.
    pub pix_offset: u64,

    /// Image width in pixels.
    pub pix_width: u32,

    /// Image height in pixels.
    pub pix_height: u32,

    /// Pixel type of the payload.
    pub pixel_type: PixelType,

    /// Pixel compression code (always [`UNCOMPRESSED`]).
    pub pix_compression: u32,

    /// Byte offset of the metadata payload.
    pub md_offset: u64,

    /// Length of the metadata payload in bytes.
    pub md_length: u32,

    /// Metadata compression code (always [`UNCOMPRESSED`]).
    pub md_compression: u32,

    /// Sentinel flag: a finished entry signals end-of-dataset to
    /// out-of-process listeners and is never written to disk.
    finished: bool,
}

impl IndexEntry {
    /// Create an entry for a written image.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        axes_key: String,
        pixel_type: PixelType,
        pix_offset: u64,
        pix_width: u32,
        pix_height: u32,
        md_offset: u64,
        md_length: u32,
        filename: String,
    ) -> Self {
        Self {
            axes_key,
            filename,
            pix_offset,
            pix_width,
            pix_height,
            pixel_type,
            pix_compression: UNCOMPRESSED,
            md_offset,
            md_length,
            md_compression: UNCOMPRESSED,
            finished: false,
        }
    }

    /// Create the all-zero sentinel that marks a finished dataset.
    pub fn finished() -> Self {
        Self {
            axes_key: String::new(),
            filename: String::new(),
            pix_offset: 0,
            pix_width: 0,
            pix_height: 0,
            pixel_type: PixelType::Gray8,
            pix_compression: UNCOMPRESSED,
            md_offset: 0,
            md_length: 0,
            md_compression: UNCOMPRESSED,
            finished: true,
        }
    }

    /// Whether this is the end-of-dataset sentinel.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes of pixel payload this entry occupies on disk.
    ///
    /// RGB is stored at 3 bytes per pixel; mono at its byte depth.
    pub fn pixel_bytes_on_disk(&self) -> u64 {
        let per_pixel = if self.pixel_type.is_rgb() {
            3
        } else {
            self.pixel_type.byte_depth() as u64
        };
        self.pix_width as u64 * self.pix_height as u64 * per_pixel
    }

    /// The image properties carried by the entry itself.
    pub fn essential_metadata(&self) -> EssentialMetadata {
        EssentialMetadata {
            width: self.pix_width,
            height: self.pix_height,
            bit_depth: self.pixel_type.bit_depth(),
            rgb: self.pixel_type.is_rgb(),
        }
    }

    /// Encode this entry to its on-disk form (native byte order).
    pub fn encode(&self) -> Bytes {
        let order = ByteOrder::native();
        let axes = self.axes_key.as_bytes();
        let filename = self.filename.as_bytes();

        let mut buf = BytesMut::with_capacity(4 + axes.len() + 4 + filename.len() + 4 * 8);
        order.put_u32(&mut buf, axes.len() as u32);
        buf.extend_from_slice(axes);
        order.put_u32(&mut buf, filename.len() as u32);
        buf.extend_from_slice(filename);
        order.put_u32(&mut buf, self.pix_offset as u32);
        order.put_u32(&mut buf, self.pix_width);
        order.put_u32(&mut buf, self.pix_height);
        order.put_u32(&mut buf, self.pixel_type.code());
        order.put_u32(&mut buf, self.pix_compression);
        order.put_u32(&mut buf, self.md_offset as u32);
        order.put_u32(&mut buf, self.md_length);
        order.put_u32(&mut buf, self.md_compression);
        buf.freeze()
    }

    /// Decode one entry starting at `*pos`, advancing `*pos` past it.
    pub fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, IndexError> {
        let order = ByteOrder::native();
        let start = *pos as u64;

        let axes_key = read_length_prefixed(buf, pos, order, start)?;
        let filename = read_length_prefixed(buf, pos, order, start)?;

        let mut words = [0u32; 8];
        for word in &mut words {
            if buf.len() < *pos + 4 {
                return Err(IndexError::TruncatedEntry { offset: start });
            }
            *word = order.read_u32(&buf[*pos..]);
            *pos += 4;
        }

        Ok(Self {
            axes_key,
            filename,
            pix_offset: words[0] as u64,
            pix_width: words[1],
            pix_height: words[2],
            pixel_type: PixelType::from_code(words[3])?,
            pix_compression: words[4],
            md_offset: words[5] as u64,
            md_length: words[6],
            md_compression: words[7],
            finished: false,
        })
    }
}

/// Read a u32-length-prefixed UTF-8 string field.
fn read_length_prefixed(
    buf: &[u8],
    pos: &mut usize,
    order: ByteOrder,
    entry_start: u64,
) -> Result<String, IndexError> {
    if buf.len() < *pos + 4 {
        return Err(IndexError::TruncatedEntry {
            offset: entry_start,
        });
    }
    let len = order.read_u32(&buf[*pos..]) as usize;
    *pos += 4;
    if buf.len() < *pos + len {
        return Err(IndexError::TruncatedEntry {
            offset: entry_start,
        });
    }
    let s = std::str::from_utf8(&buf[*pos..*pos + len])
        .map_err(|_| IndexError::InvalidUtf8 {
            offset: entry_start,
        })?
        .to_string();
    *pos += len;
    Ok(s)
}

// =============================================================================
// Index Map Loading
// =============================================================================

/// Read an entire `NDTiff.index` file into a map from axes key to
/// entry.
///
/// Entries are streamed from the start of the file to its end; a
/// later entry for the same key replaces an earlier one. A
/// zero-length axes key marks preallocated space past the last
/// written entry and ends the scan.
pub fn read_index_map(path: &Path) -> Result<BTreeMap<String, IndexEntry>, IndexError> {
    let buf = std::fs::read(path)?;
    let mut map = BTreeMap::new();
    let mut pos = 0usize;

    while pos + 4 <= buf.len() {
        if ByteOrder::native().read_u32(&buf[pos..]) == 0 {
            break;
        }
        let entry = IndexEntry::decode(&buf, &mut pos)?;
        map.insert(entry.axes_key.clone(), entry);
    }
    Ok(map)
}

// =============================================================================
// Tests
// =============================================================================
