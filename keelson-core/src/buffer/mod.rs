//! Byte buffers and shared streams.
//!
//! Two abstractions live here:
//! - [`fifo::Fifo`]: a plain segmented byte queue owned by one caller.
//! - [`stream`]: a producer/consumer pair over a shared, lock-protected
//!   byte queue with a sticky status bit, used by pipelines and socket IO.

pub mod fifo;
pub mod stream;
