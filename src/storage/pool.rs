//! Reusable buffer pool for the write path.
//!
//! At multi-GB/s acquisition rates, allocating a fresh multi-megabyte
//! buffer per image makes the allocator the bottleneck. The pool
//! keeps a few recently-freed buffers per distinct capacity and hands
//! them back LIFO (a buffer freed moments ago may still be warm in
//! cache). The pool does not need to be large: its only job is to
//! have a buffer ready at steady state, when writing keeps pace with
//! the camera.
//!
//! The pool is touched only from the writer thread; the internal lock
//! is uncontended and exists so the pool can be shared by reference
//! across the writer-side components.

use std::collections::{HashMap, VecDeque};

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::config::BufferPoolConfig;

/// Size-keyed pool of reusable byte buffers.
pub struct BufferPool {
    config: BufferPoolConfig,
    pools: Mutex<HashMap<usize, VecDeque<BytesMut>>>,
}

impl BufferPool {
    /// Create a pool with the given tunables.
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Payload size at or above which callers should route through
    /// [`Self::get_large`].
    pub fn direct_threshold(&self) -> usize {
        self.config.direct_threshold
    }

    /// Allocate a fresh empty buffer of the given capacity.
    ///
    /// Small buffers (IFD blocks, headers) are cheap enough that
    /// recycling them would only add bookkeeping.
    pub fn get_small(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }

    /// Get an empty buffer of exactly the given capacity, reusing a
    /// pooled one when available.
    pub fn get_large(&self, capacity: usize) -> BytesMut {
        if self.config.pool_size_per_capacity == 0 || capacity < self.config.recycle_min_size {
            return BytesMut::with_capacity(capacity);
        }

        let mut pools = self.pools.lock();
        if let Some(deque) = pools.get_mut(&capacity) {
            if let Some(mut buf) = deque.pop_front() {
                buf.clear();
                return buf;
            }
        }
        BytesMut::with_capacity(capacity)
    }

    /// Return a buffer to the pool keyed by its capacity.
    ///
    /// Each capacity retains at most `pool_size_per_capacity`
    /// buffers; the oldest is discarded on overflow. Buffers below
    /// `recycle_min_size` are dropped.
    pub fn try_recycle(&self, buf: BytesMut) {
        if self.config.pool_size_per_capacity == 0
            || buf.capacity() < self.config.recycle_min_size
        {
            return;
        }

        let mut pools = self.pools.lock();
        let deque = pools.entry(buf.capacity()).or_default();
        if deque.len() == self.config.pool_size_per_capacity {
            deque.pop_back();
        }
        deque.push_front(buf);
    }

    /// Number of buffers currently pooled for a capacity.
    #[cfg(test)]
    fn pooled_count(&self, capacity: usize) -> usize {
        self.pools.lock().get(&capacity).map_or(0, VecDeque::len)
    }
}

// =============================================================================
// Tests
// =============================================================================
