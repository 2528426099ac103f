//! Container file writer.
//!
//! One writer owns one container file for its lifetime. The file is
//! preallocated to the 4 GiB cap at creation (growing a file
//! incrementally costs a metadata round-trip per extension, which the
//! acquisition hot path cannot afford) and truncated back to its used
//! length by [`TiffWriter::finished_writing`].
//!
//! Writes land in strictly sequential order: for each image, the IFD
//! block (directory entries, next-IFD pointer, bits-per-sample array
//! for RGB, resolution rationals), then the pixel payload, then the
//! metadata payload. The writer remembers where it wrote the last
//! next-IFD pointer so the chain can be terminated with a zero on
//! finish.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tracing::debug;

use crate::error::TiffError;
use crate::format::index::{IndexEntry, PixelType};
use crate::io::{ByteOrder, SharedFile};
use crate::storage::pool::BufferPool;

use super::tags::{
    BITS_PER_SAMPLE, COMPRESSION, ENTRIES_PER_IFD, HEIGHT, MM_METADATA,
    PHOTOMETRIC_INTERPRETATION, RESOLUTION_UNIT, ROWS_PER_STRIP, SAMPLES_PER_PIXEL,
    STRIP_BYTE_COUNTS, STRIP_OFFSETS, TYPE_ASCII, TYPE_LONG, TYPE_RATIONAL, TYPE_SHORT, WIDTH,
    X_RESOLUTION, Y_RESOLUTION,
};
use super::{
    HEADER_SIZE, MAJOR_VERSION, MAX_FILE_SIZE, MINOR_VERSION, NDTIFF_MARKER, SUMMARY_MD_HEADER,
    TIFF_VERSION,
};

/// Fixed bytes of one image record outside the payloads: entry count,
/// directory entries, next-IFD pointer, and the two rationals.
const IFD_FIXED_BYTES: u64 = 2 + ENTRIES_PER_IFD as u64 * 12 + 4 + 16;

/// Safety margin kept free below the 4 GiB cap.
const SPACE_PADDING: u64 = 5_000_000;

/// Writer for a single rolling container file.
pub struct TiffWriter {
    file: SharedFile,
    filename: String,
    order: ByteOrder,

    /// Next sequential write position.
    position: u64,

    /// Location of the most recently written next-IFD pointer, zeroed
    /// on finish to terminate the IFD chain.
    next_ifd_offset_location: Option<u64>,

    res_numerator: u32,
    res_denominator: u32,

    /// Rollover threshold; at most the 4 GiB TIFF limit.
    max_file_size: u64,

    pool: Arc<BufferPool>,
    started: Instant,
}

impl TiffWriter {
    /// Create a new container file and write its header and summary
    /// metadata. `max_file_size` is the rollover threshold, normally
    /// [`MAX_FILE_SIZE`].
    ///
    /// Preallocation failure (typically a full disk) is fatal and
    /// leaves no file behind.
    pub fn new(
        directory: &Path,
        filename: &str,
        summary_md: &serde_json::Value,
        pool: Arc<BufferPool>,
        max_file_size: u64,
    ) -> Result<Self, TiffError> {
        let max_file_size = max_file_size.min(MAX_FILE_SIZE);
        let path: PathBuf = directory.join(filename);
        let file = File::options()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;

        // The file size is an overestimate; it is truncated on finish.
        if let Err(source) = file.set_len(max_file_size) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(TiffError::Preallocate { path, source });
        }

        let (res_numerator, res_denominator) = resolution_from_summary(summary_md);

        let mut writer = Self {
            file: SharedFile::new(file),
            filename: filename.to_string(),
            order: ByteOrder::native(),
            position: 0,
            next_ifd_offset_location: None,
            res_numerator,
            res_denominator,
            max_file_size,
            pool,
            started: Instant::now(),
        };
        writer.write_header_and_summary(summary_md)?;
        Ok(writer)
    }

    /// The basename of this container within its level directory.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The shared handle to the underlying file, reused by the paired
    /// reader so in-flight files are readable without reopening.
    pub fn shared_file(&self) -> SharedFile {
        self.file.clone()
    }

    /// Whether another image of the given payload sizes fits below
    /// the file size cap with the safety padding intact.
    pub fn has_space_to_write(&self, pixel_len: usize, md_len: usize, rgb: bool) -> bool {
        let pixel_bytes = bytes_on_disk(pixel_len, rgb);
        let needed =
            self.position + md_len as u64 + IFD_FIXED_BYTES + 6 + pixel_bytes + SPACE_PADDING;
        needed < self.max_file_size
    }

    /// Write one image record and return its index entry.
    ///
    /// The caller has already verified [`Self::has_space_to_write`]
    /// and validated the pixel type. RGB pixels arrive packed 4 bytes
    /// per pixel (B, G, R, A) and are stored as 3-byte R, G, B.
    pub fn write_image(
        &mut self,
        axes_key: &str,
        pixels: &[u8],
        metadata: &[u8],
        pixel_type: PixelType,
        height: u32,
        width: u32,
    ) -> Result<IndexEntry, TiffError> {
        let rgb = pixel_type.is_rgb();

        // IFDs start on a word boundary
        if self.position % 2 == 1 {
            self.position += 1;
        }

        let pixel_bytes = bytes_on_disk(pixels.len(), rgb);
        let ifd_block_len = (2 + ENTRIES_PER_IFD as usize * 12 + 4 + if rgb { 6 } else { 0 } + 16)
            as u64;

        // Locations of everything in this record
        let next_ifd_offset_location = self.position + 2 + ENTRIES_PER_IFD as u64 * 12;
        let bits_per_sample_offset = next_ifd_offset_location + 4;
        let x_resolution_offset = bits_per_sample_offset + if rgb { 6 } else { 0 };
        let y_resolution_offset = x_resolution_offset + 8;
        let pixel_data_offset = y_resolution_offset + 8;
        let metadata_offset = pixel_data_offset + pixel_bytes;

        let mut next_ifd_offset = metadata_offset + metadata.len() as u64;
        if next_ifd_offset % 2 == 1 {
            next_ifd_offset += 1;
        }

        // Assemble the IFD block: entry count, 13 entries in ascending
        // tag order, next-IFD pointer, then the out-of-line small
        // values (bits-per-sample for RGB, x/y resolution rationals).
        let mut ifd = self.pool.get_small(ifd_block_len as usize);
        self.order.put_u16(&mut ifd, ENTRIES_PER_IFD);

        let bit_depth_on_disk = pixel_type.byte_depth() * 8;
        self.put_ifd_entry(&mut ifd, WIDTH, TYPE_LONG, 1, width as u64);
        self.put_ifd_entry(&mut ifd, HEIGHT, TYPE_LONG, 1, height as u64);
        if rgb {
            self.put_ifd_entry(&mut ifd, BITS_PER_SAMPLE, TYPE_SHORT, 3, bits_per_sample_offset);
        } else {
            self.put_ifd_entry(&mut ifd, BITS_PER_SAMPLE, TYPE_SHORT, 1, bit_depth_on_disk as u64);
        }
        self.put_ifd_entry(&mut ifd, COMPRESSION, TYPE_SHORT, 1, 1);
        self.put_ifd_entry(
            &mut ifd,
            PHOTOMETRIC_INTERPRETATION,
            TYPE_SHORT,
            1,
            if rgb { 2 } else { 1 },
        );
        self.put_ifd_entry(&mut ifd, STRIP_OFFSETS, TYPE_LONG, 1, pixel_data_offset);
        self.put_ifd_entry(
            &mut ifd,
            SAMPLES_PER_PIXEL,
            TYPE_SHORT,
            1,
            if rgb { 3 } else { 1 },
        );
        self.put_ifd_entry(&mut ifd, ROWS_PER_STRIP, TYPE_SHORT, 1, height as u64);
        self.put_ifd_entry(&mut ifd, STRIP_BYTE_COUNTS, TYPE_LONG, 1, pixel_bytes);
        self.put_ifd_entry(&mut ifd, X_RESOLUTION, TYPE_RATIONAL, 1, x_resolution_offset);
        self.put_ifd_entry(&mut ifd, Y_RESOLUTION, TYPE_RATIONAL, 1, y_resolution_offset);
        self.put_ifd_entry(&mut ifd, RESOLUTION_UNIT, TYPE_SHORT, 1, 3);
        self.put_ifd_entry(
            &mut ifd,
            MM_METADATA,
            TYPE_ASCII,
            metadata.len() as u32,
            metadata_offset,
        );

        self.order.put_u32(&mut ifd, next_ifd_offset as u32);

        if rgb {
            for _ in 0..3 {
                self.order.put_u16(&mut ifd, bit_depth_on_disk as u16);
            }
        }
        self.order.put_u32(&mut ifd, self.res_numerator);
        self.order.put_u32(&mut ifd, self.res_denominator);
        self.order.put_u32(&mut ifd, self.res_numerator);
        self.order.put_u32(&mut ifd, self.res_denominator);

        // Sequential writes: IFD block, pixel payload, metadata
        self.file.write_all_at(self.position, &ifd)?;
        self.pool.try_recycle(ifd);

        if rgb {
            let repacked = self.repack_rgb(pixels);
            self.file.write_all_at(pixel_data_offset, &repacked)?;
            self.pool.try_recycle(repacked);
        } else {
            self.file.write_all_at(pixel_data_offset, pixels)?;
        }
        self.file.write_all_at(metadata_offset, metadata)?;

        self.next_ifd_offset_location = Some(next_ifd_offset_location);
        self.position = metadata_offset + metadata.len() as u64;

        Ok(IndexEntry::new(
            axes_key.to_string(),
            pixel_type,
            pixel_data_offset,
            width,
            height,
            metadata_offset,
            metadata.len() as u32,
            self.filename.clone(),
        ))
    }

    /// Replace the pixel payload of an already-written image in place.
    ///
    /// Tiff structure and metadata are untouched; the pyramid uses
    /// this to accumulate contributions into a coarser tile.
    pub fn overwrite_pixels(
        &mut self,
        entry: &IndexEntry,
        pixels: &[u8],
        rgb: bool,
    ) -> Result<(), TiffError> {
        if rgb {
            let repacked = self.repack_rgb(pixels);
            self.file.write_all_at(entry.pix_offset, &repacked)?;
            self.pool.try_recycle(repacked);
        } else {
            self.file.write_all_at(entry.pix_offset, pixels)?;
        }
        Ok(())
    }

    /// Terminate the IFD chain and truncate the file to its used
    /// length. After this the file is a well-formed TIFF that any
    /// baseline reader can walk.
    pub fn finished_writing(&mut self) -> Result<(), TiffError> {
        if let Some(location) = self.next_ifd_offset_location.take() {
            let mut zero = [0u8; 4];
            self.order.write_u32(&mut zero, 0);
            self.file.write_all_at(location, &zero)?;
        }
        self.file.set_len(self.position)?;

        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            debug!(
                file = %self.filename,
                gb_per_s = (self.position as f64 / elapsed) / (1024.0 * 1024.0 * 1024.0),
                "finished container file"
            );
        }
        Ok(())
    }

    /// Write the 28-byte extended header followed by the summary
    /// metadata, leaving `position` at the first IFD offset.
    fn write_header_and_summary(&mut self, summary_md: &serde_json::Value) -> Result<(), TiffError> {
        let summary_bytes = serde_json::to_vec(summary_md)
            .map_err(TiffError::InvalidSummaryMetadata)?;
        let md_length = summary_bytes.len() as u32;

        let mut first_ifd_offset = HEADER_SIZE as u32 + md_length;
        if first_ifd_offset % 2 == 1 {
            first_ifd_offset += 1;
        }

        let mut header = BytesMut::with_capacity(HEADER_SIZE as usize);
        match self.order {
            ByteOrder::LittleEndian => header.extend_from_slice(b"II"),
            ByteOrder::BigEndian => header.extend_from_slice(b"MM"),
        }
        self.order.put_u16(&mut header, TIFF_VERSION);
        self.order.put_u32(&mut header, first_ifd_offset);
        self.order.put_u32(&mut header, NDTIFF_MARKER);
        self.order.put_u32(&mut header, MAJOR_VERSION);
        self.order.put_u32(&mut header, MINOR_VERSION);
        self.order.put_u32(&mut header, SUMMARY_MD_HEADER);
        self.order.put_u32(&mut header, md_length);

        self.file.write_all_at(0, &header)?;
        self.file.write_all_at(HEADER_SIZE, &summary_bytes)?;
        self.position = first_ifd_offset as u64;
        Ok(())
    }

    /// Append one 12-byte directory entry. A single SHORT value is
    /// left-justified in the 4-byte value field per the TIFF spec.
    fn put_ifd_entry(&self, buf: &mut BytesMut, tag: u16, field_type: u16, count: u32, value: u64) {
        self.order.put_u16(buf, tag);
        self.order.put_u16(buf, field_type);
        self.order.put_u32(buf, count);
        if field_type == TYPE_SHORT && count == 1 {
            self.order.put_u16(buf, value as u16);
            self.order.put_u16(buf, 0);
        } else {
            self.order.put_u32(buf, value as u32);
        }
    }

    /// Repack 4-byte B, G, R, A pixels into 3-byte R, G, B.
    fn repack_rgb(&self, pixels: &[u8]) -> BytesMut {
        let pixel_count = pixels.len() / 4;
        let repacked_len = pixel_count * 3;
        let mut out = if repacked_len >= self.pool.direct_threshold() {
            self.pool.get_large(repacked_len)
        } else {
            self.pool.get_small(repacked_len)
        };
        for px in 0..pixel_count {
            out.extend_from_slice(&[
                pixels[px * 4 + 2],
                pixels[px * 4 + 1],
                pixels[px * 4],
            ]);
        }
        out
    }
}

/// Bytes a pixel payload occupies on disk: RGB input shrinks from 4
/// to 3 bytes per pixel, everything else is stored as supplied.
fn bytes_on_disk(pixel_len: usize, rgb: bool) -> u64 {
    if rgb {
        (pixel_len / 4 * 3) as u64
    } else {
        pixel_len as u64
    }
}

/// Derive the TIFF resolution rational from the summary metadata's
/// `PixelSizeUm` (or `PixelSize_um`) key, as pixels per centimetre.
/// Without a pixel size the default is 10000/1 (1/10000 cm per pixel).
fn resolution_from_summary(summary_md: &serde_json::Value) -> (u32, u32) {
    let pixel_size_um = summary_md
        .get("PixelSizeUm")
        .or_else(|| summary_md.get("PixelSize_um"))
        .and_then(|v| v.as_f64());

    let cm_per_pixel = 0.0001 * pixel_size_um.unwrap_or(1.0);
    if cm_per_pixel >= 1.0 {
        (1, cm_per_pixel as u32)
    } else {
        ((1.0 / cm_per_pixel) as u32, 1)
    }
}

// =============================================================================
// Tests
// =============================================================================
