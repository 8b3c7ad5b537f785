//! Replay log for session output
//!
//! A bounded ring of the most recent bytes a session's process produced.
//! The registry appends to it and snapshots it under the session lock, so a
//! snapshot never interleaves with a concurrent append.

use bytes::Bytes;
use std::collections::VecDeque;

/// Default replay capacity (1MB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Ring buffer for terminal output
#[derive(Debug)]
pub struct OutputBuffer {
    data: VecDeque<u8>,
    max_size: usize,
    /// Total bytes ever appended, including evicted ones
    total_written: u64,
}

impl OutputBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(max_size.min(64 * 1024)),
            max_size,
            total_written: 0,
        }
    }

    /// Append data, evicting the oldest bytes past capacity
    pub fn push(&mut self, chunk: &[u8]) {
        self.total_written += chunk.len() as u64;

        if self.max_size == 0 {
            return;
        }

        // Only the tail of an oversized chunk can survive
        let chunk = if chunk.len() > self.max_size {
            &chunk[chunk.len() - self.max_size..]
        } else {
            chunk
        };

        let overflow = (self.data.len() + chunk.len()).saturating_sub(self.max_size);
        if overflow > 0 {
            self.data.drain(..overflow);
        }
        self.data.extend(chunk);
    }

    /// Copy of the current contents, oldest byte first
    pub fn snapshot(&self) -> Bytes {
        let (head, tail) = self.data.as_slices();
        let mut out = Vec::with_capacity(head.len() + tail.len());
        out.extend_from_slice(head);
        out.extend_from_slice(tail);
        Bytes::from(out)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.total_written = 0;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Bytes that were appended but no longer fit
    pub fn evicted(&self) -> u64 {
        self.total_written - self.data.len() as u64
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
