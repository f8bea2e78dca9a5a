//! Pre-allocated byte-buffer pool
//!
//! The pool never blocks on exhaustion: an empty reserve allocates a fresh
//! buffer, trading transient over-allocation for stable tail latency.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Fixed-size buffer pool with hit/miss/in-use accounting.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    allocated: AtomicUsize,
    in_use: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Counter snapshot for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BufferPoolStats {
    pub allocated: usize,
    pub in_use: usize,
    pub available: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
}

impl BufferPool {
    /// Create a pool with `count` pre-allocated buffers of `buffer_size`
    /// bytes each.
    pub fn new(count: usize, buffer_size: usize) -> Arc<Self> {
        let mut free = Vec::with_capacity(count);
        for _ in 0..count {
            free.push(vec![0u8; buffer_size]);
        }

        Arc::new(Self {
            free: Mutex::new(free),
            buffer_size,
            allocated: AtomicUsize::new(count),
            in_use: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Check out a buffer viewed at exactly `size` bytes.
    ///
    /// Requests within the pool's buffer size are served from the reserve
    /// (or freshly allocated on a miss); larger requests get a one-off
    /// allocation that is still tracked as in-use until released.
    pub fn acquire(self: &Arc<Self>, size: usize) -> BufferLease {
        self.in_use.fetch_add(1, Ordering::Relaxed);

        let buf = if size <= self.buffer_size {
            let reserved = self.free.lock().expect("buffer pool lock poisoned").pop();
            match reserved {
                Some(buf) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    buf
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    self.allocated.fetch_add(1, Ordering::Relaxed);
                    vec![0u8; self.buffer_size]
                }
            }
        } else {
            vec![0u8; size]
        };

        BufferLease {
            buf,
            len: size,
            pool: self.clone(),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if buf.capacity() >= self.buffer_size {
            buf.resize(self.buffer_size, 0);
            self.free.lock().expect("buffer pool lock poisoned").push(buf);
        }
    }

    pub fn stats(&self) -> BufferPoolStats {
        let allocated = self.allocated.load(Ordering::Relaxed);
        let in_use = self.in_use.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate_percent = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        BufferPoolStats {
            allocated,
            in_use,
            available: allocated.saturating_sub(in_use),
            hits,
            misses,
            hit_rate_percent,
        }
    }
}

/// A checked-out buffer. Dereferences to the requested length and returns
/// itself to the pool on drop.
pub struct BufferLease {
    buf: Vec<u8>,
    len: usize,
    pool: Arc<BufferPool>,
}

impl Deref for BufferLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl DerefMut for BufferLease {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
