use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// A segmented FIFO byte queue.
///
/// The queue holds multiple `Bytes` segments and hands bytes back in write
/// order without copying when a request fits inside a single segment (just a
/// refcount bump on the underlying `Bytes`).
///
/// # Use Cases
///
/// - Assembling frames before they hit the socket
/// - Collecting received chunks until a full payload is available
///
/// Requests spanning several segments are copied into one contiguous buffer;
/// for large payloads built from many reads that cost is unavoidable.
#[derive(Debug, Default, Clone)]
pub struct Fifo {
    segs: VecDeque<Bytes>,
    len: usize,
}

impl Fifo {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segs: VecDeque::new(),
            len: 0,
        }
    }

    /// Number of bytes currently queued.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a segment to the back of the queue.
    #[inline]
    pub fn write(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segs.push_back(bytes);
    }

    /// Take up to `n` bytes from the front of the queue.
    ///
    /// Returns fewer than `n` bytes when the queue holds fewer; never more.
    /// If the first segment covers the request this is zero-copy.
    pub fn read(&mut self, n: usize) -> Bytes {
        let take = n.min(self.len);
        if take == 0 {
            return Bytes::new();
        }

        let front = self
            .segs
            .front_mut()
            .expect("non-zero len implies a segment");
        if front.len() >= take {
            self.len -= take;
            let out = front.split_to(take);
            if front.is_empty() {
                self.segs.pop_front();
            }
            return out;
        }

        // Spans segments: copy.
        let mut out = BytesMut::with_capacity(take);
        let mut remaining = take;
        while remaining > 0 {
            let seg = self.segs.pop_front().expect("len accounting");
            let part = remaining.min(seg.len());
            out.extend_from_slice(&seg[..part]);
            remaining -= part;
            self.len -= part;
            if part < seg.len() {
                let mut rest = seg;
                rest.advance(part);
                self.segs.push_front(rest);
            }
        }

        out.freeze()
    }

    /// Drain the whole queue into one contiguous buffer.
    pub fn extract(&mut self) -> Bytes {
        let len = self.len;
        self.read(len)
    }

    /// Discard up to `n` bytes from the front, dropping consumed segments.
    ///
    /// Returns the number of bytes actually discarded.
    pub fn skip(&mut self, n: usize) -> usize {
        let mut remaining = n.min(self.len);
        let skipped = remaining;
        self.len -= remaining;

        while remaining > 0 {
            let Some(mut front) = self.segs.pop_front() else {
                break;
            };
            if remaining >= front.len() {
                remaining -= front.len();
                continue;
            }
            // partially consumed
            front.advance(remaining);
            self.segs.push_front(front);
            break;
        }

        skipped
    }

    /// Copy the first `n` bytes into `dst` without consuming them.
    ///
    /// Returns `false` if fewer than `n` bytes are queued or `dst` is short.
    pub fn peek(&self, n: usize, dst: &mut [u8]) -> bool {
        if n > self.len || dst.len() < n {
            return false;
        }

        let mut remaining = n;
        let mut out_off = 0;
        for seg in &self.segs {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(seg.len());
            dst[out_off..out_off + take].copy_from_slice(&seg[..take]);
            out_off += take;
            remaining -= take;
        }
        true
    }
}

impl From<Bytes> for Fifo {
    fn from(bytes: Bytes) -> Self {
        let mut fifo = Self::new();
        fifo.write(bytes);
        fifo
    }
}

impl From<Vec<u8>> for Fifo {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}
