//! Per-source PCM byte buffer
//!
//! Chunks arrive from the input in whatever sizes the producer wrote them;
//! the mixer takes exact frame-sized slices back out. The cached length is
//! kept in step with the chunk list so the tick never has to walk it.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// Ordered byte chunks awaiting consumption
#[derive(Debug, Default)]
pub struct SourceBuffer {
    chunks: VecDeque<Bytes>,
    /// Sum of all chunk lengths
    len: usize,
    /// Total bytes ever appended
    total: u64,
    /// Ticks where a live source could not supply a full frame
    underrun_count: u64,
    /// Ticks where an ended source was padded with silence
    padded_count: u64,
}

impl SourceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.total += chunk.len() as u64;
        self.chunks.push_back(chunk);
    }

    /// Remove exactly `n` bytes from the front.
    ///
    /// Returns `None` and leaves the buffer untouched if fewer than `n`
    /// bytes are buffered.
    pub fn take(&mut self, n: usize) -> Option<Bytes> {
        if n > self.len {
            return None;
        }
        if n == 0 {
            return Some(Bytes::new());
        }

        // Fast path: the head chunk covers the whole request
        if let Some(front) = self.chunks.front_mut() {
            if front.len() >= n {
                let out = front.split_to(n);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                self.len -= n;
                return Some(out);
            }
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let want = (n - out.len()).min(front.len());
            out.extend_from_slice(&front[..want]);
            front.advance(want);
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }
        self.len -= n;
        Some(out.freeze())
    }

    /// Drain everything buffered, zero-padded up to `n` bytes.
    pub fn take_padded(&mut self, n: usize) -> Bytes {
        let have = self.len;
        let mut out = BytesMut::with_capacity(n.max(have));
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        self.len = 0;
        if out.len() < n {
            out.resize(n, 0);
        }
        self.padded_count += 1;
        out.freeze()
    }

    pub fn record_underrun(&mut self) {
        self.underrun_count += 1;
    }

    /// Buffered byte count
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whole sample frames still buffered
    pub fn remaining_samples(&self, sample_size: usize) -> usize {
        self.len / sample_size
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            buffered: self.len,
            total: self.total,
            underruns: self.underrun_count,
            padded: self.padded_count,
        }
    }
}

/// Source buffer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub buffered: usize,
    pub total: u64,
    pub underruns: u64,
    pub padded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_within_single_chunk() {
        let mut buffer = SourceBuffer::new();
        buffer.push(Bytes::from_static(&[1, 2, 3, 4, 5, 6]));

        assert_eq!(buffer.take(4).unwrap().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.take(2).unwrap().as_ref(), &[5, 6]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_across_chunks() {
        let mut buffer = SourceBuffer::new();
        buffer.push(Bytes::from_static(&[1, 2]));
        buffer.push(Bytes::from_static(&[3]));
        buffer.push(Bytes::from_static(&[4, 5, 6]));

        assert_eq!(buffer.take(4).unwrap().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.take(2).unwrap().as_ref(), &[5, 6]);
    }

    #[test]
    fn test_take_short_leaves_buffer_intact() {
        let mut buffer = SourceBuffer::new();
        buffer.push(Bytes::from_static(&[1, 2, 3]));

        assert!(buffer.take(4).is_none());
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.stats().total, 3);
    }

    #[test]
    fn test_take_padded() {
        let mut buffer = SourceBuffer::new();
        buffer.push(Bytes::from_static(&[9, 9]));
        buffer.push(Bytes::from_static(&[9]));

        let frame = buffer.take_padded(6);
        assert_eq!(frame.as_ref(), &[9, 9, 9, 0, 0, 0]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().padded, 1);
    }

    #[test]
    fn test_remaining_samples_ignores_partial_frame() {
        let mut buffer = SourceBuffer::new();
        buffer.push(Bytes::from(vec![0u8; 7]));
        assert_eq!(buffer.remaining_samples(4), 1);
        buffer.take(4);
        assert_eq!(buffer.remaining_samples(4), 0);
        assert!(!buffer.is_empty());
    }
}
