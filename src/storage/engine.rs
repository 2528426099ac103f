//! The top-level storage engine.
//!
//! An [`NDTiffStorage`] routes every write to the full-resolution
//! level and, for tiled datasets, fans it out into the pyramid of
//! 2x2-averaged levels. It owns the single dedicated writer thread:
//! all mutation (container writes, index appends, rollovers, pyramid
//! accumulation) happens serially on that thread, which is what
//! keeps the on-disk invariants free of locks.
//!
//! Callers hand images over through a bounded queue; enqueueing
//! blocks when the queue is full, which is the backpressure against
//! cameras outrunning the disk. Each put returns a [`WriteHandle`]
//! resolved by the writer thread with the produced index entry.
//!
//! Reads never touch the queue: they are served from the in-memory
//! index maps (and the write-pending side table for images not yet
//! flushed) plus a positional read of the container file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{StorageError, TiffError};
use crate::format::axes::{
    axes_at_tile, deserialize_axes, serialize_axes, AxisKind, AxisValue, Axes, COL_AXIS, ROW_AXIS,
};
use crate::format::index::{EssentialMetadata, IndexEntry, PixelType};
use crate::format::TaggedImage;
use crate::storage::downsample::{downsample_into_quadrant, DownsampleGeometry};
use crate::storage::level::{PendingImage, ResolutionLevel};
use crate::storage::pool::BufferPool;
use crate::storage::stitch::{stitch, StitchWindow};

/// Directory holding level 0 of a tiled (v2-layout) dataset.
pub const FULL_RES_DIR: &str = "Full resolution";

/// Directory name prefix of pyramid levels; level k lives in
/// `Downsampled_x{2^k}`.
pub const DOWNSAMPLE_DIR_PREFIX: &str = "Downsampled_x";

/// Optional opaque display-settings file at the dataset root.
pub const DISPLAY_SETTINGS_FILE: &str = "display_settings.txt";

// Reserved summary-metadata keys the engine maintains
const KEY_OVERLAP_X: &str = "GridPixelOverlapX";
const KEY_OVERLAP_Y: &str = "GridPixelOverlapY";
const KEY_TILED: &str = "TiledImageStorage";

// =============================================================================
// WriteHandle
// =============================================================================

/// The pending result of one enqueued write.
///
/// Resolved by the writer thread with the produced index entry, or
/// with the error that failed the write.
pub struct WriteHandle {
    rx: Receiver<Result<IndexEntry, String>>,
}

impl WriteHandle {
    /// Block until the writer thread has processed this write.
    pub fn wait(self) -> Result<IndexEntry, StorageError> {
        match self.rx.recv() {
            Ok(Ok(entry)) => Ok(entry),
            Ok(Err(message)) => Err(StorageError::WriterFailed(message)),
            Err(_) => Err(StorageError::WriterGone),
        }
    }
}

// =============================================================================
// Writer-thread tasks
// =============================================================================

struct PutTask {
    axes: Axes,
    axes_key: String,
    pixels: Bytes,
    metadata: Bytes,
    pixel_type: PixelType,
    width: u32,
    height: u32,
    fan_out: bool,
    completion: Sender<Result<IndexEntry, String>>,
}

enum WriteTask {
    Put(PutTask),
    IncreaseMaxLevel {
        new_max: u32,
        done: Sender<Result<(), String>>,
    },
    Finish {
        done: Sender<Result<(), String>>,
    },
}

// =============================================================================
// NDTiffStorage
// =============================================================================

/// A single NDTiff dataset, writable (created) or read-only (opened).
pub struct NDTiffStorage {
    inner: Arc<StorageInner>,
    queue_tx: Mutex<Option<Sender<WriteTask>>>,
    writer_thread: Mutex<Option<JoinHandle<()>>>,
    queue_capacity: usize,
}

struct StorageInner {
    directory: PathBuf,
    prefix: String,
    summary_metadata: serde_json::Value,
    display_settings: RwLock<Option<serde_json::Value>>,

    tiled: bool,
    x_overlap: u32,
    y_overlap: u32,
    loaded: bool,
    finished: AtomicBool,

    first_image_added: AtomicBool,
    /// Dimensions of a full-resolution image including overlap.
    full_res_tile_dims: RwLock<Option<(u32, u32)>>,
    /// Tile dimensions with the overlap removed (equal to the above
    /// for non-tiled datasets).
    tile_dims: RwLock<Option<(u32, u32)>>,

    /// Level index to storage; 0 is full resolution.
    levels: RwLock<BTreeMap<u32, Arc<ResolutionLevel>>>,
    max_resolution_level: AtomicU32,

    /// Each axis name is bound to integer or string at first use.
    axis_types: Mutex<HashMap<String, AxisKind>>,

    /// Coordinates of every accepted image.
    image_axes: RwLock<HashSet<Axes>>,

    /// First error from the writer thread; later puts fail fast.
    write_error: Mutex<Option<String>>,

    pool: Arc<BufferPool>,
    max_file_size: u64,
}

impl NDTiffStorage {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new writable dataset rooted at `directory`.
    ///
    /// For tiled datasets the engine records the overlap and tiled
    /// flag into the summary metadata and places level 0 under
    /// `Full resolution/`.
    pub fn create(
        directory: &Path,
        prefix: &str,
        summary_metadata: serde_json::Value,
        tiled: bool,
        x_overlap: u32,
        y_overlap: u32,
        config: StorageConfig,
    ) -> Result<Self, StorageError> {
        config.validate().map_err(StorageError::InvalidConfig)?;

        let mut summary = match summary_metadata {
            serde_json::Value::Null => serde_json::json!({}),
            value @ serde_json::Value::Object(_) => value,
            _ => return Err(StorageError::SummaryNotObject),
        };
        if let serde_json::Value::Object(map) = &mut summary {
            if tiled {
                map.insert(KEY_OVERLAP_X.to_string(), x_overlap.into());
                map.insert(KEY_OVERLAP_Y.to_string(), y_overlap.into());
            }
            map.insert(KEY_TILED.to_string(), tiled.into());
        }

        let level0_dir = if tiled {
            directory.join(FULL_RES_DIR)
        } else {
            directory.to_path_buf()
        };
        std::fs::create_dir_all(directory)?;

        let pool = Arc::new(BufferPool::new(config.buffer_pool.clone()));
        let max_file_size = config.effective_container_size_cap();
        let level0 = ResolutionLevel::create(
            &level0_dir,
            summary.clone(),
            prefix,
            pool.clone(),
            max_file_size,
        )?;

        let mut levels = BTreeMap::new();
        levels.insert(0, Arc::new(level0));

        let inner = Arc::new(StorageInner {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            summary_metadata: summary,
            display_settings: RwLock::new(None),
            tiled,
            x_overlap,
            y_overlap,
            loaded: false,
            finished: AtomicBool::new(false),
            first_image_added: AtomicBool::new(false),
            full_res_tile_dims: RwLock::new(None),
            tile_dims: RwLock::new(None),
            levels: RwLock::new(levels),
            max_resolution_level: AtomicU32::new(config.max_resolution_level.unwrap_or(0)),
            axis_types: Mutex::new(HashMap::new()),
            image_axes: RwLock::new(HashSet::new()),
            write_error: Mutex::new(None),
            pool,
            max_file_size,
        });

        let queue_capacity = config.effective_queue_capacity();
        let (tx, rx) = bounded::<WriteTask>(queue_capacity);
        let thread_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name("ndtiff-writer".to_string())
            .spawn(move || writer_loop(thread_inner, rx))?;

        info!(directory = %directory.display(), tiled, "created dataset");

        Ok(Self {
            inner,
            queue_tx: Mutex::new(Some(tx)),
            writer_thread: Mutex::new(Some(handle)),
            queue_capacity,
        })
    }

    /// Open an existing dataset read-only.
    ///
    /// Accepts both the v2 layout (full resolution under
    /// `Full resolution/`, also tolerating being handed that
    /// directory itself) and the v3 layout (non-tiled data at the
    /// top level). Pyramid levels are discovered in increasing order
    /// until the first gap.
    pub fn open(directory: &Path) -> Result<Self, StorageError> {
        let mut root = directory.to_path_buf();
        if root.file_name().and_then(|n| n.to_str()) == Some(FULL_RES_DIR) {
            if let Some(parent) = root.parent() {
                root = parent.to_path_buf();
            }
        }

        let full_res_dir = if root.join(FULL_RES_DIR).is_dir() {
            root.join(FULL_RES_DIR)
        } else {
            root.clone()
        };

        let pool = Arc::new(BufferPool::new(Default::default()));
        let level0 = Arc::new(ResolutionLevel::open(&full_res_dir, pool.clone())?);
        let summary = level0.summary_metadata().clone();

        // Datasets predating the tiled-flag key load as tiled
        let tiled = summary
            .get(KEY_TILED)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);

        let display_settings = match std::fs::read(root.join(DISPLAY_SETTINGS_FILE)) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("couldn't parse {DISPLAY_SETTINGS_FILE}: {e}");
                    None
                }
            },
            Err(_) => None,
        };

        let mut image_axes = HashSet::new();
        for key in level0.image_keys() {
            image_axes.insert(deserialize_axes(&key)?);
        }

        let full_res_tile_dims = level0.first_image_dims();

        let (x_overlap, y_overlap) = if tiled {
            (
                summary
                    .get(KEY_OVERLAP_X)
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0) as u32,
                summary
                    .get(KEY_OVERLAP_Y)
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0) as u32,
            )
        } else {
            (0, 0)
        };
        let tile_dims =
            full_res_tile_dims.map(|(w, h)| (w.saturating_sub(x_overlap), h.saturating_sub(y_overlap)));

        let mut levels = BTreeMap::new();
        levels.insert(0, level0);
        let mut max_level = 0;
        if tiled {
            for k in 1u32.. {
                let ds_dir = root.join(format!("{DOWNSAMPLE_DIR_PREFIX}{}", 1u64 << k));
                if !ds_dir.is_dir() {
                    break;
                }
                levels.insert(k, Arc::new(ResolutionLevel::open(&ds_dir, pool.clone())?));
                max_level = k;
            }
        }

        debug!(
            directory = %root.display(),
            levels = levels.len(),
            images = image_axes.len(),
            "opened dataset"
        );

        let inner = Arc::new(StorageInner {
            directory: root,
            prefix: String::new(),
            summary_metadata: summary,
            display_settings: RwLock::new(display_settings),
            tiled,
            x_overlap,
            y_overlap,
            loaded: true,
            finished: AtomicBool::new(true),
            first_image_added: AtomicBool::new(full_res_tile_dims.is_some()),
            full_res_tile_dims: RwLock::new(full_res_tile_dims),
            tile_dims: RwLock::new(tile_dims),
            levels: RwLock::new(levels),
            max_resolution_level: AtomicU32::new(max_level),
            axis_types: Mutex::new(HashMap::new()),
            image_axes: RwLock::new(image_axes),
            write_error: Mutex::new(None),
            pool,
            max_file_size: crate::format::tiff::MAX_FILE_SIZE,
        });

        Ok(Self {
            inner,
            queue_tx: Mutex::new(None),
            writer_thread: Mutex::new(None),
            queue_capacity: 0,
        })
    }

    // -------------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------------

    /// Store one image for a non-tiled dataset (no pyramid fan-out).
    ///
    /// Serialises the metadata on the calling thread, records the
    /// image as write-pending so concurrent readers see it, and hands
    /// the write to the writer thread. Blocks while the queue is
    /// full.
    #[allow(clippy::too_many_arguments)]
    pub fn put_image(
        &self,
        pixels: Bytes,
        metadata: serde_json::Value,
        axes: Axes,
        rgb: bool,
        bit_depth: u32,
        height: u32,
        width: u32,
    ) -> Result<WriteHandle, StorageError> {
        self.put_internal(pixels, metadata, axes, rgb, bit_depth, height, width, false)
    }

    /// Store one tile of a tiled dataset and fan it out to every
    /// pyramid level. The coordinate must carry the reserved `row`
    /// and `column` axes.
    #[allow(clippy::too_many_arguments)]
    pub fn put_image_multi_res(
        &self,
        pixels: Bytes,
        metadata: serde_json::Value,
        axes: Axes,
        rgb: bool,
        bit_depth: u32,
        height: u32,
        width: u32,
    ) -> Result<WriteHandle, StorageError> {
        self.put_internal(pixels, metadata, axes, rgb, bit_depth, height, width, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn put_internal(
        &self,
        pixels: Bytes,
        metadata: serde_json::Value,
        axes: Axes,
        rgb: bool,
        bit_depth: u32,
        height: u32,
        width: u32,
        fan_out: bool,
    ) -> Result<WriteHandle, StorageError> {
        if self.inner.finished.load(Ordering::Acquire) {
            return Err(StorageError::DatasetFinished);
        }
        self.check_for_writing_error()?;

        let pixel_type = PixelType::from_bit_depth(bit_depth, rgb)
            .ok_or(StorageError::UnsupportedPixelFormat { bit_depth, rgb })?;

        let expected_len = width as usize
            * height as usize
            * if rgb { 4 } else { pixel_type.byte_depth() as usize };
        if pixels.len() != expected_len {
            return Err(StorageError::PixelBufferSize {
                expected: expected_len,
                actual: pixels.len(),
            });
        }

        // Each axis takes all-integer or all-string values
        {
            let mut axis_types = self.inner.axis_types.lock();
            for (name, value) in &axes {
                let kind = axis_types.entry(name.clone()).or_insert_with(|| value.kind());
                if *kind != value.kind() {
                    return Err(StorageError::AxisTypeConflict { axis: name.clone() });
                }
            }
        }

        if fan_out && self.inner.tiled && tile_coordinates(&axes).is_none() {
            return Err(StorageError::MissingTileAxes);
        }

        self.latch_tile_dims(width, height)?;

        let metadata_bytes: Bytes = serde_json::to_vec(&metadata)
            .map_err(TiffError::InvalidImageMetadata)?
            .into();
        let axes_key = serialize_axes(&axes);

        self.inner.image_axes.write().insert(axes.clone());
        let level0 = self.inner.level(0)?;
        level0.add_write_pending(
            axes_key.clone(),
            PendingImage {
                image: TaggedImage::new(pixels.clone(), metadata),
                essential: EssentialMetadata {
                    width,
                    height,
                    bit_depth,
                    rgb,
                },
            },
        );

        let (completion, rx) = bounded(1);
        let task = WriteTask::Put(PutTask {
            axes,
            axes_key,
            pixels,
            metadata: metadata_bytes,
            pixel_type,
            width,
            height,
            fan_out,
            completion,
        });

        let queue = self.queue_tx.lock();
        let tx = queue.as_ref().ok_or(StorageError::DatasetFinished)?;
        debug!(queue_len = tx.len(), "enqueueing write");
        tx.send(task).map_err(|_| StorageError::WriterGone)?;

        Ok(WriteHandle { rx })
    }

    /// Grow the pyramid to `new_max` levels, re-downsampling every
    /// existing image into each new level. Safe to call at any time
    /// on a writable dataset.
    pub fn increase_max_resolution_level(&self, new_max: u32) -> Result<(), StorageError> {
        if self.inner.finished.load(Ordering::Acquire) {
            return Err(StorageError::DatasetFinished);
        }
        let (done, done_rx) = bounded(1);
        {
            let queue = self.queue_tx.lock();
            let tx = queue.as_ref().ok_or(StorageError::DatasetFinished)?;
            tx.send(WriteTask::IncreaseMaxLevel { new_max, done })
                .map_err(|_| StorageError::WriterGone)?;
        }
        match done_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(StorageError::WriterFailed(message)),
            Err(_) => Err(StorageError::WriterGone),
        }
    }

    /// Surface an error recorded by the writer thread; once set,
    /// every subsequent put fails fast with it.
    pub fn check_for_writing_error(&self) -> Result<(), StorageError> {
        match self.inner.write_error.lock().as_ref() {
            Some(message) => Err(StorageError::WriterFailed(message.clone())),
            None => Ok(()),
        }
    }

    /// Finish the dataset: drain the queue, terminate every
    /// container's IFD chain, truncate containers and indexes, and
    /// write the display settings if set.
    ///
    /// This is a barrier: when it returns, every earlier put has
    /// either resolved or reported an error, and a fresh loader will
    /// see every committed image. No-op on loaded datasets.
    pub fn finished_writing(&self) -> Result<(), StorageError> {
        if self.inner.loaded {
            return Ok(());
        }
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (done, done_rx) = bounded(1);
        {
            let mut queue = self.queue_tx.lock();
            let tx = queue.as_ref().ok_or(StorageError::WriterGone)?;
            tx.send(WriteTask::Finish { done })
                .map_err(|_| StorageError::WriterGone)?;
            // Closing the channel lets the writer thread exit once
            // the finish task is processed
            *queue = None;
        }

        let result = match done_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(StorageError::WriterFailed(message)),
            Err(_) => Err(StorageError::WriterGone),
        };

        if let Some(handle) = self.writer_thread.lock().take() {
            if handle.join().is_err() {
                return Err(StorageError::WriterGone);
            }
        }
        info!(directory = %self.inner.directory.display(), "finished writing dataset");
        result
    }

    // -------------------------------------------------------------------------
    // Read path
    // -------------------------------------------------------------------------

    /// Retrieve a full-resolution image by coordinate.
    pub fn get_image(&self, axes: &Axes) -> Result<Option<TaggedImage>, StorageError> {
        self.get_image_at_level(axes, 0)
    }

    /// Retrieve an image at a pyramid level; `None` when absent.
    pub fn get_image_at_level(
        &self,
        axes: &Axes,
        level: u32,
    ) -> Result<Option<TaggedImage>, StorageError> {
        let storage = match self.inner.levels.read().get(&level) {
            Some(storage) => storage.clone(),
            None => return Ok(None),
        };
        storage.get_image(&serialize_axes(axes))
    }

    /// Whether an image exists at a coordinate and level.
    pub fn has_image(&self, axes: &Axes, level: u32) -> bool {
        self.inner
            .levels
            .read()
            .get(&level)
            .is_some_and(|storage| storage.has_image(&serialize_axes(axes)))
    }

    /// Image properties at a coordinate and level, without reading
    /// pixel data.
    pub fn essential_metadata(&self, axes: &Axes, level: u32) -> Option<EssentialMetadata> {
        self.inner
            .levels
            .read()
            .get(&level)?
            .essential_metadata(&serialize_axes(axes))
    }

    /// Composite a `width x height` window whose top-left is `(x, y)`
    /// in the given level's pixel coordinates. Coordinates may be
    /// negative; regions without tiles stay background.
    pub fn get_display_image(
        &self,
        axes: &Axes,
        level: u32,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    ) -> Result<TaggedImage, StorageError> {
        let Some((tile_width, tile_height)) = *self.inner.tile_dims.read() else {
            return Ok(TaggedImage::new(Bytes::new(), serde_json::Value::Null));
        };
        let (full_res_tile_width, _) =
            (*self.inner.full_res_tile_dims.read()).unwrap_or((tile_width, tile_height));

        let window = StitchWindow {
            x,
            y,
            width,
            height,
            tile_width,
            tile_height,
            full_res_tile_width,
            x_overlap: self.inner.x_overlap,
            y_overlap: self.inner.y_overlap,
            level,
        };

        let storage = self.inner.levels.read().get(&level).cloned();
        let tiled = self.inner.tiled;

        stitch(&window, |row, col| {
            let Some(storage) = &storage else {
                return Ok(None);
            };
            let key = if tiled {
                serialize_axes(&axes_at_tile(axes, row as i32, col as i32))
            } else {
                serialize_axes(axes)
            };
            let Some(essential) = storage.essential_metadata(&key) else {
                return Ok(None);
            };
            Ok(storage.get_image(&key)?.map(|image| (image, essential)))
        })
    }

    /// A full-resolution window; equivalent to
    /// [`Self::get_display_image`] at level 0.
    pub fn get_sub_image(
        &self,
        axes: &Axes,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    ) -> Result<TaggedImage, StorageError> {
        self.get_display_image(axes, 0, x, y, width, height)
    }

    /// Pixel bounds `[x_min, y_min, x_max, y_max]` of the dataset at
    /// full resolution. `None` before the first image of a tiled
    /// dataset.
    pub fn image_bounds(&self) -> Option<[i64; 4]> {
        let (tile_width, tile_height) = (*self.inner.tile_dims.read())?;
        if !self.inner.tiled {
            let (w, h) = (*self.inner.full_res_tile_dims.read())?;
            return Some([0, 0, w as i64, h as i64]);
        }

        let axes_set = self.inner.image_axes.read();
        let rows: Vec<i32> = axes_set
            .iter()
            .filter_map(|a| a.get(ROW_AXIS).and_then(AxisValue::as_i32))
            .collect();
        let cols: Vec<i32> = axes_set
            .iter()
            .filter_map(|a| a.get(COL_AXIS).and_then(AxisValue::as_i32))
            .collect();

        let (min_row, max_row) = min_max(&rows);
        let (min_col, max_col) = min_max(&cols);
        let (tw, th) = (tile_width as i64, tile_height as i64);

        if self.inner.loaded {
            let x_min = min_col as i64 * tw;
            let y_min = min_row as i64 * th;
            Some([
                x_min,
                y_min,
                x_min + (max_col - min_col + 1) as i64 * tw,
                y_min + (max_row - min_row + 1) as i64 * th,
            ])
        } else {
            Some([
                0,
                0,
                (max_col as i64 + 1) * tw,
                (max_row as i64 + 1) * th,
            ])
        }
    }

    /// Tiles `(row, column)` that hold data where `axis == index`.
    pub fn tile_indices_with_data_at(&self, axis: &str, index: i32) -> Vec<(i32, i32)> {
        let mut tiles: Vec<(i32, i32)> = self
            .inner
            .image_axes
            .read()
            .iter()
            .filter(|axes| {
                axes.get(axis).and_then(AxisValue::as_i32) == Some(index)
            })
            .filter_map(|axes| {
                Some((
                    axes.get(ROW_AXIS)?.as_i32()?,
                    axes.get(COL_AXIS)?.as_i32()?,
                ))
            })
            .collect();
        tiles.sort_unstable();
        tiles.dedup();
        tiles
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The coordinates of every accepted image.
    pub fn axes_set(&self) -> HashSet<Axes> {
        self.inner.image_axes.read().clone()
    }

    /// The dataset's summary metadata, including the engine's
    /// reserved keys.
    pub fn summary_metadata(&self) -> &serde_json::Value {
        &self.inner.summary_metadata
    }

    /// The opaque display settings, when present.
    pub fn display_settings(&self) -> Option<serde_json::Value> {
        self.inner.display_settings.read().clone()
    }

    /// Set the display settings to be written on finish.
    pub fn set_display_settings(&self, settings: serde_json::Value) {
        *self.inner.display_settings.write() = Some(settings);
    }

    /// Number of pyramid levels, counting full resolution.
    pub fn num_res_levels(&self) -> u32 {
        self.inner.max_resolution_level.load(Ordering::Acquire) + 1
    }

    /// Whether the dataset stores tiles on an XY grid.
    pub fn is_tiled(&self) -> bool {
        self.inner.tiled
    }

    /// Whether writing has finished (always true once loaded).
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Tasks currently waiting in the write queue.
    pub fn writing_queue_len(&self) -> usize {
        self.queue_tx.lock().as_ref().map_or(0, Sender::len)
    }

    /// Capacity of the write queue.
    pub fn writing_queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// The dataset's root directory.
    pub fn disk_location(&self) -> &Path {
        &self.inner.directory
    }

    /// Total bytes across every level directory.
    pub fn dataset_size(&self) -> u64 {
        self.inner
            .levels
            .read()
            .values()
            .map(|level| level.dataset_size())
            .sum()
    }

    /// Close every reader's file handle. A writable dataset should be
    /// finished first.
    pub fn close(&self) {
        for level in self.inner.levels.read().values() {
            level.close();
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Latch the uniform tile dimensions from the first image; for
    /// tiled datasets later images must match them.
    fn latch_tile_dims(&self, width: u32, height: u32) -> Result<(), StorageError> {
        if !self.inner.first_image_added.swap(true, Ordering::AcqRel) {
            *self.inner.full_res_tile_dims.write() = Some((width, height));
            let (tw, th) = if self.inner.tiled {
                (
                    width.saturating_sub(self.inner.x_overlap),
                    height.saturating_sub(self.inner.y_overlap),
                )
            } else {
                (width, height)
            };
            *self.inner.tile_dims.write() = Some((tw, th));
            return Ok(());
        }

        if self.inner.tiled {
            if let Some((expected_width, expected_height)) = *self.inner.full_res_tile_dims.read()
            {
                if (width, height) != (expected_width, expected_height) {
                    return Err(StorageError::TileSizeMismatch {
                        expected_width,
                        expected_height,
                        width,
                        height,
                    });
                }
            }
        }
        Ok(())
    }
}

impl StorageInner {
    /// The storage for a level that must exist.
    fn level(&self, index: u32) -> Result<Arc<ResolutionLevel>, StorageError> {
        self.levels
            .read()
            .get(&index)
            .cloned()
            .ok_or_else(|| StorageError::LoadFailed {
                path: self.directory.clone(),
                reason: format!("resolution level {index} missing"),
            })
    }

    /// Get or create the storage for a pyramid level.
    fn ensure_level(&self, index: u32) -> Result<Arc<ResolutionLevel>, StorageError> {
        if let Some(level) = self.levels.read().get(&index) {
            return Ok(level.clone());
        }
        let dir = self
            .directory
            .join(format!("{DOWNSAMPLE_DIR_PREFIX}{}", 1u64 << index));
        let level = Arc::new(ResolutionLevel::create(
            &dir,
            self.summary_metadata.clone(),
            &self.prefix,
            self.pool.clone(),
            self.max_file_size,
        )?);
        self.levels.write().insert(index, level.clone());
        Ok(level)
    }
}

/// The reserved `(row, column)` coordinates of a tile, when present.
fn tile_coordinates(axes: &Axes) -> Option<(i32, i32)> {
    Some((
        axes.get(ROW_AXIS)?.as_i32()?,
        axes.get(COL_AXIS)?.as_i32()?,
    ))
}

fn min_max(values: &[i32]) -> (i32, i32) {
    let mut iter = values.iter().copied();
    let Some(first) = iter.next() else {
        return (0, 0);
    };
    iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

// =============================================================================
// Writer thread
// =============================================================================

fn writer_loop(inner: Arc<StorageInner>, rx: Receiver<WriteTask>) {
    for task in rx.iter() {
        match task {
            WriteTask::Put(task) => handle_put(&inner, task),
            WriteTask::IncreaseMaxLevel { new_max, done } => {
                let result = handle_increase_max_level(&inner, new_max);
                let _ = done.send(result.map_err(|e| e.to_string()));
            }
            WriteTask::Finish { done } => {
                let _ = done.send(handle_finish(&inner).map_err(|e| e.to_string()));
                break;
            }
        }
    }
    debug!("writer thread exiting");
}

fn handle_put(inner: &StorageInner, task: PutTask) {
    let result = (|| -> Result<IndexEntry, StorageError> {
        let level0 = inner.level(0)?;
        let entry = level0.put_image(
            &task.axes_key,
            &task.pixels,
            &task.metadata,
            task.pixel_type,
            task.height,
            task.width,
        )?;

        if task.fan_out && inner.tiled {
            if let Some((row, col)) = tile_coordinates(&task.axes) {
                let max_level = inner.max_resolution_level.load(Ordering::Acquire);
                fan_out_to_pyramid(
                    inner,
                    &task.axes,
                    &task.pixels,
                    &task.metadata,
                    task.pixel_type,
                    1,
                    max_level,
                    row,
                    col,
                )?;
            }
        }
        Ok(entry)
    })();

    match result {
        Ok(entry) => {
            let _ = task.completion.send(Ok(entry));
        }
        Err(error) => {
            let message = error.to_string();
            warn!(error = %message, "write failed");
            *inner.write_error.lock() = Some(message.clone());
            let _ = task.completion.send(Err(message));
        }
    }
}

/// Fold one tile into pyramid levels `start_level..=end_level`.
///
/// At each level the incoming tile shrinks into one quadrant of the
/// covering tile at `(row / 2, col / 2)` (floor division, so negative
/// grids work); a missing covering tile is created zero-filled, an
/// existing one is overwritten in place.
#[allow(clippy::too_many_arguments)]
fn fan_out_to_pyramid(
    inner: &StorageInner,
    axes: &Axes,
    pixels: &[u8],
    metadata: &[u8],
    pixel_type: PixelType,
    start_level: u32,
    end_level: u32,
    mut row: i32,
    mut col: i32,
) -> Result<(), StorageError> {
    let Some((tile_width, tile_height)) = *inner.tile_dims.read() else {
        return Ok(());
    };
    let Some((full_width, full_height)) = *inner.full_res_tile_dims.read() else {
        return Ok(());
    };

    let geometry = DownsampleGeometry {
        tile_width,
        tile_height,
        full_res_tile_width: full_width,
        full_res_tile_height: full_height,
        x_overlap: inner.x_overlap,
        y_overlap: inner.y_overlap,
    };
    let rgb = pixel_type.is_rgb();
    let byte_depth = pixel_type.byte_depth();
    let tile_len = (tile_width * tile_height) as usize
        * if rgb { 4 } else { byte_depth as usize };

    let mut previous: Bytes = Bytes::copy_from_slice(pixels);
    let mut level_index = start_level;

    while level_index <= end_level {
        let level = inner.ensure_level(level_index)?;
        let coarse_row = row.div_euclid(2);
        let coarse_col = col.div_euclid(2);
        let key = serialize_axes(&axes_at_tile(axes, coarse_row, coarse_col));

        let existing = level.get_image(&key)?;
        let mut current = inner.pool.get_large(tile_len);
        match &existing {
            Some(image) if image.pixels.len() == tile_len => {
                current.extend_from_slice(&image.pixels);
            }
            _ => current.resize(tile_len, 0),
        }

        downsample_into_quadrant(
            &mut current,
            &previous,
            row,
            col,
            level_index,
            rgb,
            byte_depth,
            geometry,
        );

        if existing.is_none() {
            level.put_image(&key, &current, metadata, pixel_type, tile_height, tile_width)?;
        } else {
            level.overwrite_pixels(&key, &current, rgb)?;
        }

        previous = current.freeze();
        row = coarse_row;
        col = coarse_col;
        level_index += 1;
    }
    Ok(())
}

/// Grow the pyramid on the writer thread, re-downsampling each level
/// from the one above it.
fn handle_increase_max_level(inner: &StorageInner, new_max: u32) -> Result<(), StorageError> {
    let old_max = inner.max_resolution_level.load(Ordering::Acquire);
    if new_max <= old_max || !inner.tiled {
        return Ok(());
    }
    inner.max_resolution_level.store(new_max, Ordering::Release);

    let level0 = inner.level(0)?;
    if level0.image_keys().is_empty() {
        // Nothing written yet; the new depth applies to future tiles
        return Ok(());
    }

    for level_index in old_max + 1..=new_max {
        info!(level = level_index, "populating new resolution level");
        let previous = if level_index == 1 {
            level0.clone()
        } else {
            inner.level(level_index - 1)?
        };

        for key in previous.image_keys() {
            let axes = deserialize_axes(&key)?;
            let Some((row, col)) = tile_coordinates(&axes) else {
                continue;
            };
            let Some(image) = previous.get_image(&key)? else {
                continue;
            };
            let Some(essential) = previous.essential_metadata(&key) else {
                continue;
            };
            let pixel_type = PixelType::from_bit_depth(essential.bit_depth, essential.rgb)
                .ok_or(StorageError::UnsupportedPixelFormat {
                    bit_depth: essential.bit_depth,
                    rgb: essential.rgb,
                })?;
            let metadata = serde_json::to_vec(&image.metadata)
                .map_err(TiffError::InvalidImageMetadata)?;

            fan_out_to_pyramid(
                inner,
                &axes,
                &image.pixels,
                &metadata,
                pixel_type,
                level_index,
                level_index,
                row,
                col,
            )?;
        }
    }
    Ok(())
}

fn handle_finish(inner: &StorageInner) -> Result<(), StorageError> {
    for level in inner.levels.read().values() {
        level.finish()?;
    }

    if let Some(settings) = inner.display_settings.read().as_ref() {
        let bytes = serde_json::to_vec(settings).map_err(TiffError::InvalidSummaryMetadata)?;
        std::fs::write(inner.directory.join(DISPLAY_SETTINGS_FILE), bytes)?;
    }
    Ok(())
}
