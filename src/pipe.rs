//! Bounded single-producer/single-consumer byte ring buffer.
//!
//! A fixed-size ring with a `consumer` cursor and `total` length, all
//! guarded by one mutex, with writes invoking an optional callback once
//! the critical section is released.

use parking_lot::Mutex;
use std::sync::Arc;

const PIPE_CAPACITY: usize = 1024;

struct Inner {
    data: Vec<u8>,
    consumer: usize,
    total: usize,
    callback: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            data: vec![0u8; PIPE_CAPACITY],
            consumer: 0,
            total: 0,
            callback: None,
        }
    }
}

/// A bounded byte ring buffer shared between exactly one writer and one
/// reader thread. `clone()` gives a second handle to the same buffer.
#[derive(Clone)]
pub struct Pipe {
    inner: Arc<Mutex<Inner>>,
}

impl Pipe {
    pub fn new() -> Self {
        Pipe { inner: Arc::new(Mutex::new(Inner::new())) }
    }

    /// Installs a callback invoked after a successful `write` releases the
    /// lock. Used by backends to wake a transmit worker.
    pub fn set_callback<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.inner.lock().callback = Some(Arc::new(f));
    }

    /// Copies as much of `src` as fits; returns the number of bytes
    /// accepted (0 if the ring is already full).
    pub fn write(&self, src: &[u8]) -> usize {
        let mut num = src.len();
        let callback;
        {
            let mut inner = self.inner.lock();
            let producer = (inner.consumer + inner.total) % PIPE_CAPACITY;
            let max = PIPE_CAPACITY - inner.total;
            if num > max {
                num = max;
            }
            let mut producer = producer;
            let mut src_off = 0;
            let mut remaining = num;
            while remaining != 0 {
                let fwd = (PIPE_CAPACITY - producer).min(remaining);
                inner.data[producer..producer + fwd]
                    .copy_from_slice(&src[src_off..src_off + fwd]);
                src_off += fwd;
                remaining -= fwd;
                inner.total += fwd;
                producer += fwd;
                if producer == PIPE_CAPACITY {
                    producer = 0;
                } else {
                    break;
                }
            }
            callback = if num > 0 { inner.callback.clone() } else { None };
        }
        if let Some(cb) = callback {
            cb();
        }
        num
    }

    /// Copies up to `dst.len()` bytes out; returns the number copied (0 if
    /// empty).
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let mut num = dst.len().min(inner.total);
        let total = num;
        let mut dst_off = 0;
        let mut consumer = inner.consumer;
        while num != 0 {
            let fwd = (PIPE_CAPACITY - consumer).min(num);
            dst[dst_off..dst_off + fwd].copy_from_slice(&inner.data[consumer..consumer + fwd]);
            dst_off += fwd;
            num -= fwd;
            consumer += fwd;
            if consumer == PIPE_CAPACITY {
                consumer = 0;
            } else {
                break;
            }
        }
        inner.consumer = consumer;
        inner.total -= total;
        total
    }

    /// Drops any pending data.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.consumer = 0;
        inner.total = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}
