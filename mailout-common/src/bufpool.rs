//! Reusable byte buffers for template rendering and encoding.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Initial capacity of a freshly allocated buffer.
pub const AVERAGE_BUFFER_SIZE: usize = 4096;

/// Buffers that grew beyond this are dropped instead of being pooled.
const MAX_POOLED_CAPACITY: usize = 1 << 20;

/// A free-list of byte buffers shared by every task.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Take an empty buffer from the pool, allocating if none is free.
    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(AVERAGE_BUFFER_SIZE));

        PooledBuffer { pool: self, buf }
    }

    /// Number of buffers currently waiting in the free-list.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        self.free.lock().push(buf);
    }
}

/// A buffer checked out of a [`BufferPool`]; returned to it on drop.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}
