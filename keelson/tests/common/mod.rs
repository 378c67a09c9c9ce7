//! Shared fixtures for the client/server integration tests.

// Not every test binary touches every fixture.
#![allow(dead_code)]

use keelson::prelude::*;
use std::sync::Arc;

/// Codec whose factory accepts any opcode and keeps the payload verbatim.
pub fn passthrough_codec() -> Codec {
    let factory: PacketFactory = Arc::new(|opcode, size, consumer| {
        let body = consumer.read(size)?;
        Ok(Packet::new(opcode, body))
    });
    Codec::new(factory)
}

/// Handler that sends every decoded packet straight back.
pub struct EchoHandler;

impl ServerHandler for EchoHandler {
    fn process_client_packet(
        &self,
        server: &ServerHandle,
        client: Uuid,
        packet: &Packet,
    ) -> NetResult<()> {
        server.send(client, packet)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn free_port() -> u16 {
    init_tracing();
    portpicker::pick_unused_port().expect("no free port")
}

/// Echo server on a fresh loopback port.
pub fn start_echo_server() -> (Server, u16) {
    let port = free_port();
    let server = Server::new(Protocol::IPv4, passthrough_codec(), 5, Arc::new(EchoHandler));
    server.connect("127.0.0.1", port).unwrap();
    (server, port)
}

pub fn connected_client(port: u16) -> Client {
    let mut client = Client::new(Protocol::IPv4, passthrough_codec(), 5);
    client.connect("127.0.0.1", port).unwrap();
    client
}
