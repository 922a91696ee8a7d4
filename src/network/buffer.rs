//! Buffer pool for relay packets.
//!
//! Every forwarded query needs a reply buffer and the receive loop needs one
//! per datagram. Buffers are recycled through a shared pool instead of being
//! allocated per query.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// Largest message the relay receives or relays in one datagram.
///
/// Longer datagram replies are cut to this size by the socket.
pub const MAX_PACKET_SIZE: usize = 1536;

type Shelf = Arc<Mutex<Vec<Vec<u8>>>>;

/// A buffer borrowed from a [`BufferPool`]; goes back to it on drop.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Shelf,
}

impl PooledBuffer {
    /// Size the buffer for one full packet, zero-filled.
    pub fn packet(&mut self) -> &mut [u8] {
        self.data.clear();
        self.data.resize(MAX_PACKET_SIZE, 0);
        &mut self.data
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buffer = std::mem::take(&mut self.data);
        buffer.clear();
        // stream replies can grow a buffer to 64 KiB; don't keep those around
        if buffer.capacity() <= MAX_PACKET_SIZE * 2 {
            self.pool.lock().push(buffer);
        }
    }
}

/// A pool of reusable packet buffers. Clones share the pool.
#[derive(Clone)]
pub struct BufferPool {
    buffers: Shelf,
    initial_capacity: usize,
}

impl BufferPool {
    /// Create a pool with `pool_size` pre-allocated buffers.
    pub fn new(pool_size: usize) -> Self {
        let buffers = (0..pool_size)
            .map(|_| Vec::with_capacity(MAX_PACKET_SIZE))
            .collect();

        Self {
            buffers: Arc::new(Mutex::new(buffers)),
            initial_capacity: pool_size,
        }
    }

    /// Take an empty buffer, allocating a fresh one if the pool is drained.
    pub fn get(&self) -> PooledBuffer {
        let data = self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(MAX_PACKET_SIZE));

        PooledBuffer {
            data,
            pool: Arc::clone(&self.buffers),
        }
    }

    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }

    pub const fn capacity(&self) -> usize {
        self.initial_capacity
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64)
    }
}
