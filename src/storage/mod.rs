//! The storage engine: buffer pool, index log, resolution levels, the
//! pyramid kernels, and the top-level orchestrator.

pub mod downsample;
pub mod engine;
pub mod index_writer;
pub mod level;
pub mod pool;
pub mod stitch;

pub use engine::{
    NDTiffStorage, WriteHandle, DISPLAY_SETTINGS_FILE, DOWNSAMPLE_DIR_PREFIX, FULL_RES_DIR,
};
pub use level::ResolutionLevel;
pub use pool::BufferPool;
