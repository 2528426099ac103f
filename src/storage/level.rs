//! One resolution level of a dataset.
//!
//! A level owns one directory, either the full-resolution data or
//! one `Downsampled_x{n}` rung of the pyramid, and everything inside
//! it: the rolling set of container files, the shared index writer,
//! the map from axes key to index entry, and one reader per container
//! file.
//!
//! The write-pending map bridges the gap between admission and
//! commit: an image accepted by the API sits there, visible to
//! concurrent readers, until the writer thread flushes it and its
//! index entry exists.
//!
//! All mutation happens on the writer thread; lookups may come from
//! any thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{StorageError, TiffError};
use crate::format::index::{
    read_index_map, EssentialMetadata, IndexEntry, PixelType, INDEX_FILE_NAME,
};
use crate::format::tiff::{TiffReader, TiffWriter};
use crate::format::TaggedImage;
use crate::storage::index_writer::IndexWriter;
use crate::storage::pool::BufferPool;

// =============================================================================
// PendingImage
// =============================================================================

/// An image accepted by the API but not yet flushed to disk.
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub image: TaggedImage,
    pub essential: EssentialMetadata,
}

// =============================================================================
// ResolutionLevel
// =============================================================================

/// Storage for one directory of the dataset.
pub struct ResolutionLevel {
    directory: PathBuf,
    summary_metadata: serde_json::Value,

    /// False for a loaded (read-only) level.
    writable: bool,
    finished: AtomicBool,

    /// Committed images: axes key to on-disk location.
    index_map: RwLock<HashMap<String, IndexEntry>>,

    /// One reader per container file, keyed by basename.
    readers: RwLock<HashMap<String, TiffReader>>,

    /// Accepted-but-unflushed images, consulted before disk.
    write_pending: RwLock<HashMap<String, PendingImage>>,

    /// The rolling writer; created on the first put, dropped on finish.
    file_set: Mutex<Option<FileSet>>,

    index_writer: Mutex<Option<IndexWriter>>,

    /// Dimensions of the first image, `(width, height)`.
    first_image_dims: RwLock<Option<(u32, u32)>>,

    prefix: String,
    pool: Arc<BufferPool>,
    max_file_size: u64,
}

impl ResolutionLevel {
    /// Create a new writable level directory. `max_file_size` is the
    /// per-container rollover threshold.
    pub fn create(
        directory: &Path,
        summary_metadata: serde_json::Value,
        prefix: &str,
        pool: Arc<BufferPool>,
        max_file_size: u64,
    ) -> Result<Self, StorageError> {
        std::fs::create_dir_all(directory)?;
        let index_writer = IndexWriter::new(directory)?;

        Ok(Self {
            directory: directory.to_path_buf(),
            summary_metadata,
            writable: true,
            finished: AtomicBool::new(false),
            index_map: RwLock::new(HashMap::new()),
            readers: RwLock::new(HashMap::new()),
            write_pending: RwLock::new(HashMap::new()),
            file_set: Mutex::new(None),
            index_writer: Mutex::new(Some(index_writer)),
            first_image_dims: RwLock::new(None),
            prefix: prefix.to_string(),
            pool,
            max_file_size,
        })
    }

    /// Open an existing level directory read-only.
    ///
    /// Reads the index, opens one reader per container file named in
    /// it, and takes the summary metadata from the first reader.
    pub fn open(directory: &Path, pool: Arc<BufferPool>) -> Result<Self, StorageError> {
        let index_path = directory.join(INDEX_FILE_NAME);
        if !index_path.exists() {
            return Err(StorageError::LoadFailed {
                path: directory.to_path_buf(),
                reason: format!("no {INDEX_FILE_NAME} file"),
            });
        }
        let index_map = read_index_map(&index_path)?;

        let mut readers = HashMap::new();
        for entry in index_map.values() {
            if !readers.contains_key(&entry.filename) {
                let reader = TiffReader::open(&directory.join(&entry.filename))?;
                readers.insert(entry.filename.clone(), reader);
            }
        }

        let summary_metadata = readers
            .values()
            .next()
            .map(|r| r.summary_metadata().clone())
            .ok_or_else(|| StorageError::LoadFailed {
                path: directory.to_path_buf(),
                reason: "index holds no entries".to_string(),
            })?;

        let first_image_dims = index_map
            .values()
            .next()
            .map(|e| (e.pix_width, e.pix_height));

        debug!(
            directory = %directory.display(),
            images = index_map.len(),
            files = readers.len(),
            "opened resolution level"
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            summary_metadata,
            writable: false,
            finished: AtomicBool::new(true),
            index_map: RwLock::new(index_map.into_iter().collect()),
            readers: RwLock::new(readers),
            write_pending: RwLock::new(HashMap::new()),
            file_set: Mutex::new(None),
            index_writer: Mutex::new(None),
            first_image_dims: RwLock::new(first_image_dims),
            prefix: String::new(),
            pool,
            max_file_size: crate::format::tiff::MAX_FILE_SIZE,
        })
    }

    /// The summary metadata for this level.
    pub fn summary_metadata(&self) -> &serde_json::Value {
        &self.summary_metadata
    }

    /// The directory this level stores into.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Dimensions `(width, height)` of the first stored image.
    pub fn first_image_dims(&self) -> Option<(u32, u32)> {
        *self.first_image_dims.read()
    }

    /// Record an accepted image so concurrent readers see it before
    /// the writer thread flushes it.
    pub fn add_write_pending(&self, axes_key: String, pending: PendingImage) {
        self.write_pending.write().insert(axes_key, pending);
    }

    /// Whether an image exists for this key, committed or pending.
    pub fn has_image(&self, axes_key: &str) -> bool {
        self.write_pending.read().contains_key(axes_key)
            || self.index_map.read().contains_key(axes_key)
    }

    /// All committed and pending axes keys.
    pub fn image_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.index_map.read().keys().cloned().collect();
        keys.extend(self.write_pending.read().keys().cloned());
        keys.sort();
        keys.dedup();
        keys
    }

    /// Number of committed images.
    pub fn committed_len(&self) -> usize {
        self.index_map.read().len()
    }

    /// The index entry for a committed image.
    pub fn index_entry(&self, axes_key: &str) -> Option<IndexEntry> {
        self.index_map.read().get(axes_key).cloned()
    }

    /// Image properties without touching pixel data.
    pub fn essential_metadata(&self, axes_key: &str) -> Option<EssentialMetadata> {
        if let Some(pending) = self.write_pending.read().get(axes_key) {
            return Some(pending.essential);
        }
        self.index_map
            .read()
            .get(axes_key)
            .map(IndexEntry::essential_metadata)
    }

    /// Retrieve an image: the pending copy if one exists, otherwise
    /// from disk via the stored index entry. `None` when absent.
    pub fn get_image(&self, axes_key: &str) -> Result<Option<TaggedImage>, StorageError> {
        if let Some(pending) = self.write_pending.read().get(axes_key) {
            return Ok(Some(pending.image.clone()));
        }

        let entry = match self.index_map.read().get(axes_key) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        let reader = match self.readers.read().get(&entry.filename) {
            Some(reader) => reader.clone(),
            None => return Ok(None),
        };
        Ok(Some(reader.read_image(&entry)?))
    }

    /// Write one image. Writer thread only.
    ///
    /// Rolls the container file when the current one is out of space,
    /// appends the index entry, publishes it to the in-memory map,
    /// and clears the key's write-pending slot.
    pub fn put_image(
        &self,
        axes_key: &str,
        pixels: &[u8],
        metadata: &[u8],
        pixel_type: PixelType,
        height: u32,
        width: u32,
    ) -> Result<IndexEntry, StorageError> {
        if !self.writable || self.finished.load(Ordering::Acquire) {
            return Err(StorageError::DatasetFinished);
        }

        let mut file_set_slot = self.file_set.lock();
        if file_set_slot.is_none() {
            let (file_set, (filename, reader)) = FileSet::new(
                &self.directory,
                &self.prefix,
                &self.summary_metadata,
                self.pool.clone(),
                self.max_file_size,
            )?;
            self.readers.write().insert(filename, reader);
            *file_set_slot = Some(file_set);
        }
        let file_set = file_set_slot.as_mut().expect("file set initialised above");

        let (entry, rolled) =
            file_set.write_image(axes_key, pixels, metadata, pixel_type, height, width)?;
        if let Some((filename, reader)) = rolled {
            self.readers.write().insert(filename, reader);
        }

        if let Some(index_writer) = self.index_writer.lock().as_mut() {
            index_writer.add_entry(&entry)?;
        }

        {
            let mut dims = self.first_image_dims.write();
            if dims.is_none() {
                *dims = Some((width, height));
            }
        }
        self.index_map
            .write()
            .insert(axes_key.to_string(), entry.clone());
        self.write_pending.write().remove(axes_key);

        Ok(entry)
    }

    /// Replace the pixels of an already-written image in place.
    /// Writer thread only; the pyramid uses this to accumulate
    /// contributions into coarser tiles.
    pub fn overwrite_pixels(
        &self,
        axes_key: &str,
        pixels: &[u8],
        rgb: bool,
    ) -> Result<(), StorageError> {
        let entry = match self.index_map.read().get(axes_key) {
            Some(entry) => entry.clone(),
            None => return Ok(()),
        };
        if let Some(file_set) = self.file_set.lock().as_mut() {
            file_set.overwrite_pixels(&entry, pixels, rgb)?;
        }
        Ok(())
    }

    /// Finish this level: terminate the last container's IFD chain,
    /// truncate it and the index to their used lengths.
    pub fn finish(&self) -> Result<(), StorageError> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(file_set) = self.file_set.lock().as_mut() {
            file_set.finished()?;
        }
        if let Some(index_writer) = self.index_writer.lock().as_mut() {
            index_writer.finished_writing()?;
        }
        Ok(())
    }

    /// Whether the level has been finished.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Drop all readers, closing their file handles.
    pub fn close(&self) {
        self.readers.write().clear();
    }

    /// Total bytes of all files in this level's directory.
    pub fn dataset_size(&self) -> u64 {
        let mut size = 0;
        if let Ok(dir) = std::fs::read_dir(&self.directory) {
            for entry in dir.flatten() {
                if let Ok(md) = entry.metadata() {
                    if md.is_file() {
                        size += md.len();
                    }
                }
            }
        }
        size
    }
}

// =============================================================================
// FileSet
// =============================================================================

/// The rolling sequence of container files inside one level.
///
/// The first file is `{prefix}_NDTiffStack.tif` (just
/// `NDTiffStack.tif` for an empty prefix); each rollover appends
/// `_{k}` before the extension. Filled files are finished at
/// rollover; only the last needs finishing at the end.
struct FileSet {
    writers: Vec<TiffWriter>,
    base_filename: String,
    directory: PathBuf,
    summary_metadata: serde_json::Value,
    pool: Arc<BufferPool>,
    max_file_size: u64,
}

impl FileSet {
    fn new(
        directory: &Path,
        prefix: &str,
        summary_metadata: &serde_json::Value,
        pool: Arc<BufferPool>,
        max_file_size: u64,
    ) -> Result<(Self, (String, TiffReader)), TiffError> {
        let base_filename = if prefix.is_empty() {
            "NDTiffStack".to_string()
        } else {
            format!("{prefix}_NDTiffStack")
        };
        let filename = format!("{base_filename}.tif");

        let writer = TiffWriter::new(
            directory,
            &filename,
            summary_metadata,
            pool.clone(),
            max_file_size,
        )?;
        let reader = TiffReader::for_writer(writer.shared_file(), summary_metadata.clone());

        Ok((
            Self {
                writers: vec![writer],
                base_filename,
                directory: directory.to_path_buf(),
                summary_metadata: summary_metadata.clone(),
                pool,
                max_file_size,
            },
            (filename, reader),
        ))
    }

    /// Write an image, rolling to a fresh container first when the
    /// current one is out of space. Returns the new file's reader
    /// registration when a roll happened.
    #[allow(clippy::type_complexity)]
    fn write_image(
        &mut self,
        axes_key: &str,
        pixels: &[u8],
        metadata: &[u8],
        pixel_type: PixelType,
        height: u32,
        width: u32,
    ) -> Result<(IndexEntry, Option<(String, TiffReader)>), TiffError> {
        let rgb = pixel_type.is_rgb();
        let mut rolled = None;

        let current = self.writers.last_mut().expect("file set holds a writer");
        if !current.has_space_to_write(pixels.len(), metadata.len(), rgb) {
            current.finished_writing()?;

            let filename = format!("{}_{}.tif", self.base_filename, self.writers.len());
            debug!(file = %filename, "container full, rolling to new file");
            let writer = TiffWriter::new(
                &self.directory,
                &filename,
                &self.summary_metadata,
                self.pool.clone(),
                self.max_file_size,
            )?;
            let reader =
                TiffReader::for_writer(writer.shared_file(), self.summary_metadata.clone());
            self.writers.push(writer);
            rolled = Some((filename, reader));
        }

        let entry = self
            .writers
            .last_mut()
            .expect("file set holds a writer")
            .write_image(axes_key, pixels, metadata, pixel_type, height, width)?;
        Ok((entry, rolled))
    }

    /// Overwrite pixels in whichever container holds the entry.
    fn overwrite_pixels(
        &mut self,
        entry: &IndexEntry,
        pixels: &[u8],
        rgb: bool,
    ) -> Result<(), TiffError> {
        for writer in &mut self.writers {
            if writer.filename() == entry.filename {
                return writer.overwrite_pixels(entry, pixels, rgb);
            }
        }
        Ok(())
    }

    /// Finish the last writer; earlier ones were finished when they
    /// filled up.
    fn finished(&mut self) -> Result<(), TiffError> {
        if let Some(writer) = self.writers.last_mut() {
            writer.finished_writing()?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
