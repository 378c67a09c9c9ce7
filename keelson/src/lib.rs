//! # Keelson
//!
//! A reusable TCP messaging library: application-defined packets between a
//! server and many concurrent clients, with pluggable buffer pipelines for
//! in-flight transformations (compression, encryption, hashing).
//!
//! ## Architecture
//!
//! Keelson is layered as a byte-stream kernel plus a network substrate:
//!
//! - **`keelson-core`**: FIFO buffers, shared producer/consumer streams,
//!   transform pipelines and the data transforms
//! - **`keelson-net`**: readiness-driven sockets, the frame protocol,
//!   packet/codec layer, server dispatcher and client endpoint
//! - **`keelson`**: public API surface (this crate)
//!
//! The network layer is gated behind the `net` feature (enabled by
//! default) so transform-only users do not pull in the socket stack:
//!
//! ```toml
//! [dependencies]
//! keelson = { version = "0.1", features = ["net"] }
//! ```
//!
//! ## Quick tour
//!
//! A server implements [`ServerHandler`](net::server::ServerHandler) and
//! replies to decoded packets; a client performs request/reply exchanges
//! with [`Client::send`](net::client::Client::send). Both sides describe
//! their packet vocabulary to the codec through a factory closure, and may
//! attach mirrored pipelines (for example compress-then-encrypt) to every
//! connection.

pub use keelson_core as core;

#[cfg(feature = "net")]
pub use keelson_net as net;

/// Convenience re-exports of the items most applications touch.
pub mod prelude {
    pub use keelson_core::prelude::*;

    #[cfg(feature = "net")]
    pub use keelson_net::prelude::*;
}
