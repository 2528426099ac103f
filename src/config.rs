//! Configuration for the storage engine.
//!
//! All tunables have defaults matched to high-speed acquisition on a
//! local SSD; most callers can use [`StorageConfig::default`]. The
//! buffer-pool knobs exist because sustained multi-GB/s writes are
//! allocation-bound without buffer reuse.

// =============================================================================
// Default Values
// =============================================================================

/// Default capacity of the bounded writer handoff queue.
///
/// Enqueueing blocks the caller when the queue is full; this is the
/// backpressure mechanism against cameras that stream faster than the
/// disk can absorb.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Default payload size at which the writer routes pixel buffers
/// through the recycling pool rather than allocating fresh.
pub const DEFAULT_DIRECT_THRESHOLD: usize = 8192;

/// Default minimum capacity for a buffer to be eligible for recycling.
pub const DEFAULT_RECYCLE_MIN_SIZE: usize = 1024;

/// Default number of buffers retained per distinct capacity.
pub const DEFAULT_POOL_SIZE_PER_CAPACITY: usize = 3;

// =============================================================================
// BufferPoolConfig
// =============================================================================

/// Tunables for the writer-side buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Payload size at or above which writes use pooled buffers.
    pub direct_threshold: usize,

    /// Buffers smaller than this are never recycled.
    pub recycle_min_size: usize,

    /// Maximum buffers retained per distinct capacity; the oldest is
    /// evicted on overflow. Zero disables pooling entirely.
    pub pool_size_per_capacity: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            direct_threshold: DEFAULT_DIRECT_THRESHOLD,
            recycle_min_size: DEFAULT_RECYCLE_MIN_SIZE,
            // The pool is disabled under a 32-bit address space
            pool_size_per_capacity: if cfg!(target_pointer_width = "32") {
                0
            } else {
                DEFAULT_POOL_SIZE_PER_CAPACITY
            },
        }
    }
}

// =============================================================================
// StorageConfig
// =============================================================================

/// Configuration for a writable dataset.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Capacity of the bounded writer handoff queue.
    ///
    /// Zero means [`DEFAULT_QUEUE_CAPACITY`].
    pub queue_capacity: usize,

    /// Buffer pool tunables.
    pub buffer_pool: BufferPoolConfig,

    /// Fixed ceiling on pyramid depth, when the caller knows it in
    /// advance. `None` lets the pyramid grow on demand via
    /// `increase_max_resolution_level`.
    pub max_resolution_level: Option<u32>,

    /// Container file size at which the writer rolls to a new file.
    ///
    /// `None` means the 4 GiB TIFF limit. Values above the limit are
    /// rejected; smaller values are mainly useful to exercise
    /// rollover without writing gigabytes.
    pub container_size_cap: Option<u64>,
}

impl StorageConfig {
    /// Validate the configuration, returning a description of the
    /// first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_pool.recycle_min_size > self.buffer_pool.direct_threshold {
            return Err(format!(
                "recycle_min_size ({}) must not exceed direct_threshold ({})",
                self.buffer_pool.recycle_min_size, self.buffer_pool.direct_threshold
            ));
        }
        if let Some(cap) = self.container_size_cap {
            if cap > crate::format::tiff::MAX_FILE_SIZE {
                return Err(format!(
                    "container_size_cap ({cap}) exceeds the 4 GiB TIFF limit"
                ));
            }
        }
        Ok(())
    }

    /// The effective container size cap after applying the limit.
    pub fn effective_container_size_cap(&self) -> u64 {
        self.container_size_cap
            .unwrap_or(crate::format::tiff::MAX_FILE_SIZE)
    }

    /// The effective queue capacity after applying defaults.
    pub fn effective_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            self.queue_capacity
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StorageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_queue_capacity(), DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_explicit_queue_capacity() {
        let config = StorageConfig {
            queue_capacity: 8,
            ..Default::default()
        };
        assert_eq!(config.effective_queue_capacity(), 8);
    }

    #[test]
    fn test_container_cap_above_tiff_limit_rejected() {
        let config = StorageConfig {
            container_size_cap: Some(5 * 1024 * 1024 * 1024),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StorageConfig {
            container_size_cap: Some(8 * 1024 * 1024),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_container_size_cap(), 8 * 1024 * 1024);
    }

    #[test]
    fn test_recycle_min_above_threshold_rejected() {
        let config = StorageConfig {
            buffer_pool: BufferPoolConfig {
                direct_threshold: 512,
                recycle_min_size: 1024,
                pool_size_per_capacity: 3,
            },
            ..Default::default()
        };
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("recycle_min_size"));
    }
}
