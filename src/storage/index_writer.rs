//! Append-only writer for `NDTiff.index`.
//!
//! One index writer serves a whole level directory for the lifetime
//! of the acquisition: every successful image write appends one
//! encoded entry. The file is preallocated so appends never wait on
//! file growth, and truncated to the written length on finish.

use std::fs::File;
use std::path::Path;

use tracing::debug;

use crate::error::IndexError;
use crate::format::index::{IndexEntry, INDEX_FILE_NAME};
use crate::io::SharedFile;

/// Preallocated index size; a generous bound on any single
/// acquisition's entry count.
const INITIAL_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Appending writer for a level's index file.
pub struct IndexWriter {
    file: SharedFile,
    position: u64,
}

impl IndexWriter {
    /// Create `NDTiff.index` in a level directory and preallocate it.
    ///
    /// Preallocation failure leaves no file behind.
    pub fn new(directory: &Path) -> Result<Self, IndexError> {
        let path = directory.join(INDEX_FILE_NAME);
        let file = File::options()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;

        if let Err(source) = file.set_len(INITIAL_FILE_SIZE) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(IndexError::Io(source));
        }

        Ok(Self {
            file: SharedFile::new(file),
            position: 0,
        })
    }

    /// Append one entry to the log.
    pub fn add_entry(&mut self, entry: &IndexEntry) -> Result<(), IndexError> {
        let encoded = entry.encode();
        self.file.write_all_at(self.position, &encoded)?;
        self.position += encoded.len() as u64;
        Ok(())
    }

    /// Truncate the index to the bytes actually written.
    pub fn finished_writing(&mut self) -> Result<(), IndexError> {
        self.file.set_len(self.position)?;
        debug!(bytes = self.position, "finished index file");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::index::{read_index_map, PixelType};

    fn entry_at_time(t: i32) -> IndexEntry {
        IndexEntry::new(
            format!(r#"{{"time":{t}}}"#),
            PixelType::Gray8,
            1000 + t as u64,
            32,
            32,
            2024,
            10,
            "x_NDTiffStack.tif".to_string(),
        )
    }

    #[test]
    fn test_appends_then_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE_NAME);

        let mut writer = IndexWriter::new(dir.path()).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), INITIAL_FILE_SIZE);

        writer.add_entry(&entry_at_time(0)).unwrap();
        writer.add_entry(&entry_at_time(1)).unwrap();
        writer.finished_writing().unwrap();

        let expected = entry_at_time(0).encode().len() + entry_at_time(1).encode().len();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected as u64);

        let map = read_index_map(&path).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[r#"{"time":1}"#].pix_offset, 1001);
    }

    #[test]
    fn test_unfinished_index_still_readable() {
        // A crash before finish leaves the preallocated tail; the
        // loader stops at the first zero length word.
        let dir = tempfile::tempdir().unwrap();
        let mut writer = IndexWriter::new(dir.path()).unwrap();
        writer.add_entry(&entry_at_time(0)).unwrap();
        drop(writer);

        let map = read_index_map(&dir.path().join(INDEX_FILE_NAME)).unwrap();
        assert_eq!(map.len(), 1);
    }
}
