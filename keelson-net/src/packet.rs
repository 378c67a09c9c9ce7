//! Application packet value.

use crate::wire;
use bytes::Bytes;
use keelson_core::buffer::fifo::Fifo;

/// A typed application message: an opcode plus a serialized body.
///
/// Applications define their packet vocabulary on top of this value and
/// register a factory with the codec to rebuild typed packets from the wire
/// (see [`crate::codec::PacketFactory`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    opcode: u16,
    body: Bytes,
}

impl Packet {
    /// Payload-size threshold (bytes) at or above which a frame payload is
    /// routed through the connection pipelines. Opcodes are always carried
    /// unprocessed so peers can decode them; both the inbound and outbound
    /// paths gate on the payload length.
    pub const PROCESS_THRESHOLD: usize = 10;

    #[must_use]
    pub fn new(opcode: u16, body: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            body: body.into(),
        }
    }

    /// A packet with no body.
    #[must_use]
    pub fn empty(opcode: u16) -> Self {
        Self::new(opcode, Bytes::new())
    }

    #[must_use]
    pub const fn opcode(&self) -> u16 {
        self.opcode
    }

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Serialize into opcode-prefixed bytes.
    #[must_use]
    pub fn serialize(&self) -> Fifo {
        let mut out = Fifo::new();
        out.write(wire::encode_opcode(self.opcode));
        out.write(self.body.clone());
        out
    }
}
