//! State shared by every long-lived participant (client or server).

use crate::codec::Codec;
use crate::connection::ClientConnection;
use crate::error::{NetError, NetResult};
use crate::frame::Frame;
use crate::packet::Packet;
use crate::proto::{AtomicStatus, ConnectionStatus, Protocol, ReadResult};
use std::time::Duration;
use tracing::trace;

/// Common endpoint state: protocol family, codec, request timeout and
/// connection status. Embedded by [`crate::server::Server`] and
/// [`crate::client::Client`].
pub struct Endpoint {
    protocol: Protocol,
    codec: Codec,
    timeout_secs: u16,
    status: AtomicStatus,
}

impl Endpoint {
    /// `timeout_secs` bounds request/reply waits; `0` waits forever.
    #[must_use]
    pub fn new(protocol: Protocol, codec: Codec, timeout_secs: u16) -> Self {
        Self {
            protocol,
            codec,
            timeout_secs,
            status: AtomicStatus::new(ConnectionStatus::Disconnected),
        }
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub const fn codec(&self) -> &Codec {
        &self.codec
    }

    #[must_use]
    pub const fn timeout_secs(&self) -> u16 {
        self.timeout_secs
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.load()
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status);
    }

    /// One request, one reply.
    ///
    /// Encodes `packet` into a frame, sends it on `connection`, waits for
    /// the reply within the endpoint timeout and decodes it through the
    /// codec.
    pub fn request(&self, connection: &ClientConnection, packet: &Packet) -> NetResult<Packet> {
        let frame = Frame::from_packet(packet);
        if !connection.send(&frame) {
            return Err(NetError::Write("failed to send request frame".into()));
        }
        trace!(opcode = packet.opcode(), "request sent, awaiting reply");

        let wait = connection
            .socket()
            .wait_for_data(Duration::from_secs(u64::from(self.timeout_secs)))?;
        match wait {
            ReadResult::Success => {}
            ReadResult::Timeout => {
                return Err(NetError::Receive("timed out waiting for reply".into()))
            }
            other => {
                return Err(NetError::closed(format!(
                    "connection dropped while awaiting reply ({other:?})"
                )))
            }
        }

        let reply = connection.receive();
        self.codec.decode(&reply.to_consumer())
    }
}
