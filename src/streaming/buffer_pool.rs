//! Recycled copy buffers.
//!
//! Streams borrow a buffer for their whole lifetime and return it on drop.
//! The pool is pre-warmed at startup so steady-state streaming performs no
//! large allocations.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A thread-safe pool of uniformly sized byte buffers. Cloning shares the
/// same pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    slots: Mutex<Vec<Vec<u8>>>,
    buf_size: usize,
}

impl BufferPool {
    /// Create a pool pre-warmed with `warm` buffers of `buf_size` bytes.
    pub fn new(warm: usize, buf_size: usize) -> Self {
        let slots = (0..warm).map(|_| vec![0u8; buf_size]).collect();
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(slots),
                buf_size,
            }),
        }
    }

    /// Borrow a buffer of exactly `size` bytes, allocating a new slot when
    /// the pool is empty and growing the slot when `size` exceeds it.
    pub fn acquire(&self, size: usize) -> PooledBuffer {
        let mut buf = self
            .inner
            .slots
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.buf_size]);
        if buf.len() < size {
            buf.resize(size, 0);
        }
        PooledBuffer {
            buf,
            len: size,
            pool: self.clone(),
        }
    }

    /// Number of idle buffers currently in the pool.
    pub fn idle(&self) -> usize {
        self.inner.slots.lock().len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        // Restore the slot to its uniform size before recycling it, whether
        // the borrower grew it or used a shorter view.
        buf.resize(self.inner.buf_size, 0);
        buf.shrink_to(self.inner.buf_size);
        self.inner.slots.lock().push(buf);
    }
}

/// Exclusive borrow of one pool slot, returned unconditionally on drop.
pub struct PooledBuffer {
    buf: Vec<u8>,
    len: usize,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
