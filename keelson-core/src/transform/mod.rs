//! Data transforms over the buffer-stream contract.
//!
//! Every transform comes in two forms:
//! - a pure value form, `&[u8] -> Result<Vec<u8>, TransformError>`
//! - a streaming form returning a pipeline [`Stage`](crate::pipeline::Stage)
//!
//! Matching encode/decode stages compose to the identity, so a compressing
//! and encrypting output pipeline is undone by the mirrored input pipeline.

pub mod compress;
pub mod crypto;
pub mod hash;

use crate::buffer::stream::Producer;
use std::io;

/// `io::Write` adapter over a stream producer, for encoder backends.
pub(crate) struct ProducerWriter(pub(crate) Producer);

impl io::Write for ProducerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .write(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
