//! Offset-tracked recovery window over recently supplied input chunks.
//!
//! The tokenizer's internal buffer only retains unconsumed bytes, so the raw
//! source of a token that spans chunk boundaries may already be gone by the
//! time the token is emitted. This window keeps the original chunks keyed by
//! cumulative offset and is authoritative whenever the tokenizer cannot serve
//! a byte range. Fully-passed chunks are evicted from the front as the
//! document streams, so the window is bounded by tokenizer lag, not document
//! size.

use std::collections::VecDeque;

use bytes::Bytes;

#[derive(Debug, Default)]
pub struct ChunkWindow {
    chunks: VecDeque<Bytes>,
    /// Absolute offset of the first byte of `chunks[0]`.
    start: usize,
    /// Absolute offset one past the last buffered byte.
    end: usize,
}

impl ChunkWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an input chunk at the current end offset.
    pub fn push(&mut self, chunk: Bytes) {
        self.end += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Drop chunks that lie entirely before `offset`.
    pub fn evict_before(&mut self, offset: usize) {
        while let Some(front) = self.chunks.front() {
            let next = self.start + front.len();
            if next <= offset {
                self.chunks.pop_front();
                self.start = next;
            } else {
                break;
            }
        }
    }

    /// Copy out the absolute byte range `[start, end)`. The range is clamped
    /// to what the window still holds.
    pub fn slice(&self, start: usize, end: usize) -> Vec<u8> {
        let start = start.max(self.start).min(self.end);
        let end = end.max(start).min(self.end);
        let mut out = Vec::with_capacity(end - start);

        let mut offset = self.start;
        for chunk in &self.chunks {
            let chunk_end = offset + chunk.len();
            if chunk_end > start && offset < end {
                let from = start.saturating_sub(offset);
                let to = chunk.len() - chunk_end.saturating_sub(end);
                out.extend_from_slice(&chunk[from..to]);
            }
            if chunk_end >= end {
                break;
            }
            offset = chunk_end;
        }
        out
    }

    #[cfg(test)]
    pub fn buffered_len(&self) -> usize {
        self.end - self.start
    }
}
