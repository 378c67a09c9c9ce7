//! Keelson Core
//!
//! This crate contains the transport-agnostic byte-stream building blocks:
//! - FIFO byte queue over `Bytes` segments (`buffer::fifo`)
//! - Shared producer/consumer streams with sticky status (`buffer::stream`)
//! - Ordered transform pipelines, sync or async execution (`pipeline`)
//! - Data transforms: compression, encryption, hashing (`transform`)
//! - Error types (`error`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod buffer;
pub mod error;
pub mod pipeline;
pub mod transform;

// A small prelude for downstream crates. Kept minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::buffer::fifo::Fifo;
    pub use crate::buffer::stream::{stream_pair, Consumer, Producer, StreamStatus};
    pub use crate::error::{BufferError, TransformError};
    pub use crate::pipeline::{ExecutionMode, Pipeline, Stage};
}
