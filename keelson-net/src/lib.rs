//! Keelson Net
//!
//! A cross-platform TCP messaging substrate delivering application-defined
//! packets between a server and many concurrent clients:
//! - Non-blocking sockets with event-driven readiness waits (`sock`)
//! - Frame protocol: opcode, payload size, pipeline-processed payload (`frame`)
//! - Packet/codec layer with an application-supplied factory (`packet`, `codec`)
//! - Server dispatcher with per-client reader threads (`server`)
//! - Single-connection request/reply client (`client`)
//!
//! Payload transforms (compression, encryption, hashing) come from
//! `keelson-core` and plug in as per-connection pipelines.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod client;
pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod info;
pub mod init;
pub mod packet;
pub mod proto;
pub mod server;
pub mod sock;
pub mod wire;

pub mod prelude {
    pub use crate::client::Client;
    pub use crate::codec::{Codec, PacketFactory};
    pub use crate::error::{NetError, NetResult};
    pub use crate::frame::Frame;
    pub use crate::packet::Packet;
    pub use crate::proto::{ConnectionStatus, Protocol, ReadResult};
    pub use crate::server::{Server, ServerHandle, ServerHandler};
    pub use keelson_core::pipeline::{ExecutionMode, Pipeline};
    pub use uuid::Uuid;
}
