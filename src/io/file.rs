//! Positional access to a shared file handle.
//!
//! A container file is read concurrently (display threads, loaders)
//! while the writer thread may still be appending to it, and a
//! writer's paired reader reuses the writer's handle rather than
//! opening the file twice. [`SharedFile`] wraps the handle in a
//! mutex and serialises each positional operation as an atomic
//! seek + transfer pair.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

/// A cloneable, positionally-addressed file handle.
#[derive(Debug, Clone)]
pub struct SharedFile {
    inner: Arc<Mutex<File>>,
}

impl SharedFile {
    /// Wrap an open file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Fails with `UnexpectedEof` if the file ends first.
    pub fn read_exact_at(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        let mut buf = BytesMut::zeroed(len);
        let mut file = self.inner.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// A read racing a concurrent writer across a file boundary may
    /// land past the written region; callers treat the resulting
    /// short (possibly empty) buffer as "no data present".
    pub fn read_up_to_at(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        let mut buf = BytesMut::zeroed(len);
        let mut file = self.inner.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < len {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }

    /// Write all of `data` starting at `offset`.
    pub fn write_all_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let mut file = self.inner.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    /// Current length of the file in bytes.
    pub fn len(&self) -> std::io::Result<u64> {
        Ok(self.inner.lock().metadata()?.len())
    }

    /// Truncate (or extend) the file to `len` bytes.
    pub fn set_len(&self, len: u64) -> std::io::Result<()> {
        self.inner.lock().set_len(len)
    }

    /// Flush file contents and metadata to the device.
    pub fn sync_all(&self) -> std::io::Result<()> {
        self.inner.lock().sync_all()
    }
}

// =============================================================================
// Tests
// =============================================================================
