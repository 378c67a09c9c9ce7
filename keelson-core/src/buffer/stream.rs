//! Shared producer/consumer byte streams.
//!
//! A [`Producer`] and its paired [`Consumer`]s share an ordered byte queue
//! guarded by a mutex and a condition variable, plus a sticky
//! [`StreamStatus`] bit. The producer appends bytes or posts a terminal
//! status; consumers observe bytes in FIFO order and, once drained, observe
//! the status. Reads are non-blocking; [`Consumer::extract_until_eof`] parks
//! on the condition variable until the stream terminates.

use crate::buffer::fifo::Fifo;
use crate::error::BufferError;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Condvar waits are bounded so a consumer never sleeps past a producer that
// died without posting a status.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Terminal state of a shared stream. Sticky once it leaves `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Producer is still open
    Ok,
    /// Producer closed the stream; remaining bytes stay readable
    Eof,
    /// Producer reported a failure
    Error,
}

struct Inner {
    queue: Fifo,
    status: StreamStatus,
    reason: Option<String>,
}

struct Shared {
    inner: Mutex<Inner>,
    readable: Condvar,
    producers: AtomicUsize,
}

impl Shared {
    fn failure(&self, inner: &Inner) -> BufferError {
        BufferError::Failed(
            inner
                .reason
                .clone()
                .unwrap_or_else(|| "producer posted an error".to_string()),
        )
    }
}

/// Create a connected producer/consumer pair over a fresh stream.
#[must_use]
pub fn stream_pair() -> (Producer, Consumer) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            queue: Fifo::new(),
            status: StreamStatus::Ok,
            reason: None,
        }),
        readable: Condvar::new(),
        producers: AtomicUsize::new(1),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

/// Writing half of a shared stream.
///
/// Dropping the last producer clone closes the stream as if
/// [`Producer::close`] had been called, so consumers never park forever.
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    /// Append bytes to the stream.
    ///
    /// Rejected with [`BufferError::Closed`] once a terminal status is set.
    pub fn write(&self, bytes: impl Into<Bytes>) -> Result<(), BufferError> {
        let bytes = bytes.into();
        let mut inner = self.shared.inner.lock();
        if inner.status != StreamStatus::Ok {
            return Err(BufferError::Closed);
        }
        inner.queue.write(bytes);
        drop(inner);
        self.shared.readable.notify_all();
        Ok(())
    }

    /// Post a terminal status. The first terminal status wins.
    pub fn write_status(&self, status: StreamStatus) {
        if status == StreamStatus::Ok {
            return;
        }
        let mut inner = self.shared.inner.lock();
        if inner.status == StreamStatus::Ok {
            inner.status = status;
        }
        drop(inner);
        self.shared.readable.notify_all();
    }

    /// Post an error status with a diagnostic message.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut inner = self.shared.inner.lock();
        if inner.status == StreamStatus::Ok {
            inner.status = StreamStatus::Error;
            inner.reason = Some(reason.into());
        }
        drop(inner);
        self.shared.readable.notify_all();
    }

    /// Close the stream for writing. Equivalent to posting `Eof`.
    pub fn close(&self) {
        self.write_status(StreamStatus::Eof);
    }

    /// Mint another consumer handle on the same stream.
    #[must_use]
    pub fn consumer(&self) -> Consumer {
        Consumer {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Clone for Producer {
    fn clone(&self) -> Self {
        self.shared.producers.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if self.shared.producers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.close();
        }
    }
}

/// Reading half of a shared stream. Cloneable; clones share the cursor.
#[derive(Clone)]
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    /// Bytes currently queued and readable.
    #[must_use]
    pub fn available_bytes(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// Current stream status.
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.shared.inner.lock().status
    }

    /// Whether the producer closed the stream. Sticky.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.shared.inner.lock().status == StreamStatus::Eof
    }

    /// Whether the producer side is still open.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.shared.inner.lock().status == StreamStatus::Ok
    }

    /// Non-blocking read of up to `n` bytes.
    ///
    /// Returns an empty buffer when nothing is queued and the stream is
    /// still open or at EOF; remaining bytes are always drained before a
    /// posted `Error` is surfaced.
    pub fn read(&self, n: usize) -> Result<Bytes, BufferError> {
        let mut inner = self.shared.inner.lock();
        if inner.queue.is_empty() && inner.status == StreamStatus::Error {
            return Err(self.shared.failure(&inner));
        }
        Ok(inner.queue.read(n))
    }

    /// Park until at least one byte is readable or the stream terminates.
    ///
    /// Returns `Ok(None)` once the stream is drained and at EOF.
    pub fn read_chunk(&self) -> Result<Option<Bytes>, BufferError> {
        let mut inner = self.shared.inner.lock();
        loop {
            if !inner.queue.is_empty() {
                let len = inner.queue.len();
                return Ok(Some(inner.queue.read(len)));
            }
            match inner.status {
                StreamStatus::Eof => return Ok(None),
                StreamStatus::Error => return Err(self.shared.failure(&inner)),
                StreamStatus::Ok => {
                    let _ = self.shared.readable.wait_for(&mut inner, WAIT_SLICE);
                }
            }
        }
    }

    /// Drain the stream to EOF, parking while data is not yet available.
    pub fn extract_until_eof(&self) -> Result<Bytes, BufferError> {
        let mut out = Fifo::new();
        while let Some(chunk) = self.read_chunk()? {
            out.write(chunk);
        }
        Ok(out.extract())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn read_is_non_blocking() {
        let (producer, consumer) = stream_pair();
        assert_eq!(consumer.read(16).unwrap(), Bytes::new());
        producer.write(Bytes::from_static(b"abc")).unwrap();
        assert_eq!(consumer.read(2).unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(consumer.available_bytes(), 1);
    }

    #[test]
    fn eof_is_sticky_and_drains_first() {
        let (producer, consumer) = stream_pair();
        producer.write(Bytes::from_static(b"tail")).unwrap();
        producer.close();
        assert!(consumer.is_eof());
        assert_eq!(consumer.read(4).unwrap(), Bytes::from_static(b"tail"));
        assert!(consumer.is_eof());
        assert_eq!(consumer.read(4).unwrap(), Bytes::new());
    }

    #[test]
    fn write_after_close_is_rejected() {
        let (producer, _consumer) = stream_pair();
        producer.close();
        assert_eq!(
            producer.write(Bytes::from_static(b"x")),
            Err(BufferError::Closed)
        );
    }

    #[test]
    fn error_surfaces_after_drain() {
        let (producer, consumer) = stream_pair();
        producer.write(Bytes::from_static(b"ok")).unwrap();
        producer.fail("stage exploded");
        assert_eq!(consumer.read(2).unwrap(), Bytes::from_static(b"ok"));
        assert!(matches!(consumer.read(1), Err(BufferError::Failed(_))));
        assert!(consumer.extract_until_eof().is_err());
    }

    #[test]
    fn extract_until_eof_waits_for_producer() {
        let (producer, consumer) = stream_pair();
        let writer = thread::spawn(move || {
            for chunk in [&b"first "[..], &b"second"[..]] {
                producer.write(Bytes::copy_from_slice(chunk)).unwrap();
                thread::sleep(Duration::from_millis(5));
            }
            producer.close();
        });
        let all = consumer.extract_until_eof().unwrap();
        writer.join().unwrap();
        assert_eq!(all, Bytes::from_static(b"first second"));
    }

    #[test]
    fn dropping_last_producer_closes_stream() {
        let (producer, consumer) = stream_pair();
        let clone = producer.clone();
        drop(producer);
        assert!(consumer.is_writable());
        drop(clone);
        assert!(consumer.is_eof());
    }
}
