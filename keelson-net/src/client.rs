//! Single-connection client endpoint: connect, request/reply, disconnect.

use crate::codec::Codec;
use crate::connection::ClientConnection;
use crate::endpoint::Endpoint;
use crate::error::{NetError, NetResult};
use crate::packet::Packet;
use crate::proto::{ConnectionStatus, Protocol};
use crate::sock::client::ClientSock;
use keelson_core::pipeline::Pipeline;
use std::sync::Arc;
use tracing::{error, trace};

/// Client endpoint owning at most one connection to a server.
pub struct Client {
    endpoint: Endpoint,
    connection: Option<ClientConnection>,
}

impl Client {
    /// `timeout_secs` bounds each request/reply exchange; `0` waits forever.
    #[must_use]
    pub fn new(protocol: Protocol, codec: Codec, timeout_secs: u16) -> Self {
        Self {
            endpoint: Endpoint::new(protocol, codec, timeout_secs),
            connection: None,
        }
    }

    /// Connect to a server with identity transport pipelines.
    pub fn connect(&mut self, host: &str, port: u16) -> NetResult<()> {
        self.connect_with_pipelines(host, port, Pipeline::new(), Pipeline::new())
    }

    /// Connect to a server with explicit transport pipelines; both sides of
    /// the session must agree on them.
    pub fn connect_with_pipelines(
        &mut self,
        host: &str,
        port: u16,
        in_pipeline: Pipeline,
        out_pipeline: Pipeline,
    ) -> NetResult<()> {
        if self.connection.is_some() {
            error!("client is already connected");
            return Err(NetError::connection("client is already connected"));
        }

        let socket = Arc::new(ClientSock::new(self.endpoint.protocol()));
        socket.connect(host, port)?;

        self.connection = Some(ClientConnection::new(socket, in_pipeline, out_pipeline));
        self.endpoint.set_status(ConnectionStatus::Connected);
        trace!(host, port, protocol = %self.endpoint.protocol(), "client connected");
        Ok(())
    }

    /// Send one request and wait for its reply.
    ///
    /// Transport failures are logged and surfaced as errors; the endpoint
    /// timeout bounds the wait for the reply.
    pub fn send(&self, packet: &Packet) -> NetResult<Packet> {
        let connection = self.connection.as_ref().ok_or(NetError::NotConnected)?;
        self.endpoint.request(connection, packet).map_err(|e| {
            error!(error = %e, opcode = packet.opcode(), "request failed");
            e
        })
    }

    /// Drop the connection. Idempotent.
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            trace!("disconnecting client");
        }
        self.endpoint.set_status(ConnectionStatus::Disconnected);
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.connection
            .as_ref()
            .map_or(ConnectionStatus::Disconnected, ClientConnection::status)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketFactory;

    fn codec() -> Codec {
        let factory: PacketFactory = Arc::new(|opcode, size, consumer| {
            Ok(Packet::new(opcode, consumer.read(size)?))
        });
        Codec::new(factory)
    }

    #[test]
    fn send_without_connection_fails() {
        let client = Client::new(Protocol::IPv4, codec(), 1);
        assert!(matches!(
            client.send(&Packet::empty(1)),
            Err(NetError::NotConnected)
        ));
    }

    #[test]
    fn status_without_connection_is_disconnected() {
        let client = Client::new(Protocol::IPv4, codec(), 1);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut client = Client::new(Protocol::IPv4, codec(), 1);
        client.disconnect();
        client.disconnect();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn connect_to_closed_port_fails() {
        let mut client = Client::new(Protocol::IPv4, codec(), 1);
        assert!(client.connect("127.0.0.1", 1).is_err());
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }
}
