//! End-to-end client/server scenarios over loopback TCP.

mod common;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::{connected_client, free_port, passthrough_codec, start_echo_server};
use keelson::prelude::*;
use std::sync::Arc;
use std::thread;

#[test]
fn echo_small_message() {
    let (server, port) = start_echo_server();
    let client = connected_client(port);

    let request = Packet::new(0x0001, Bytes::from_static(b"Hello World!"));
    let reply = client.send(&request).unwrap();

    assert_eq!(reply.opcode(), 0x0001);
    assert_eq!(reply.body(), &Bytes::from_static(b"Hello World!"));
    assert_eq!(reply.body().len(), 12);

    drop(client);
    server.disconnect();
}

#[test]
fn echo_hundred_thousand_bytes() {
    let (server, port) = start_echo_server();
    let client = connected_client(port);

    let payload = vec![b'A'; 100_000];
    let reply = client
        .send(&Packet::new(0x0002, payload.clone()))
        .unwrap();

    assert_eq!(reply.opcode(), 0x0002);
    assert_eq!(reply.body().len(), 100_000);
    assert!(reply.body().iter().all(|&b| b == b'A'));

    drop(client);
    server.disconnect();
}

#[test]
fn zero_length_payload_round_trips() {
    let (server, port) = start_echo_server();
    let client = connected_client(port);

    let reply = client.send(&Packet::empty(0x0042)).unwrap();
    assert_eq!(reply.opcode(), 0x0042);
    assert!(reply.body().is_empty());

    drop(client);
    server.disconnect();
}

#[test]
fn four_clients_fan_out_independently() {
    // Each client streams its own pattern in 64 KiB request chunks and
    // must observe its own bytes echoed back, byte for byte.
    const CHUNK: usize = 64 * 1024;
    const CHUNKS_PER_CLIENT: usize = 64;

    let (server, port) = start_echo_server();

    let workers: Vec<_> = (0u8..4)
        .map(|id| {
            thread::spawn(move || {
                let client = connected_client(port);
                for round in 0..CHUNKS_PER_CLIENT {
                    let payload: Vec<u8> = (0..CHUNK)
                        .map(|i| id.wrapping_mul(31).wrapping_add((i + round) as u8))
                        .collect();
                    let reply = client
                        .send(&Packet::new(0x0001, payload.clone()))
                        .unwrap();
                    assert_eq!(reply.body().len(), CHUNK, "client {id} round {round}");
                    assert_eq!(reply.body(), &Bytes::from(payload), "client {id}");
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    server.disconnect();
    assert_eq!(server.status(), ConnectionStatus::Disconnected);
    assert_eq!(server.client_count(), 0);
}

#[test]
fn server_disconnect_clears_sessions() {
    let (server, port) = start_echo_server();
    let client_a = connected_client(port);
    let client_b = connected_client(port);

    // Both sessions live.
    client_a
        .send(&Packet::new(1, Bytes::from_static(b"ping a")))
        .unwrap();
    client_b
        .send(&Packet::new(1, Bytes::from_static(b"ping b")))
        .unwrap();

    server.disconnect();
    assert_eq!(server.status(), ConnectionStatus::Disconnected);
    assert_eq!(server.client_count(), 0);

    // With the server gone a request surfaces either as a transport error
    // or as the empty sentinel frame the codec is asked to validate.
    match client_a.send(&Packet::new(1, Bytes::from_static(b"after teardown"))) {
        Err(_) => {}
        Ok(reply) => {
            assert_eq!(reply.opcode(), 0);
            assert!(reply.body().is_empty());
        }
    }
}

// ─── Typed request/reply vocabulary ───

const C_MSG_ASKNAMELIST: u16 = 0;
const S_MSG_RESPONDNAMELIST: u16 = 1;
const C_MSG_ASKRANDOMNUMBER: u16 = 2;
const S_MSG_RESPONDRANDOMNUMBER: u16 = 3;

fn encode_name_list(names: &[String]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u64_le(names.len() as u64);
    for name in names {
        buf.put_u64_le(name.len() as u64);
        buf.put_slice(name.as_bytes());
    }
    buf.freeze()
}

fn decode_name_list(mut body: &[u8]) -> Vec<String> {
    let count = body.get_u64_le() as usize;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        let len = body.get_u64_le() as usize;
        let (name, rest) = body.split_at(len);
        names.push(String::from_utf8(name.to_vec()).unwrap());
        body = rest;
    }
    names
}

/// Codec that only admits the four opcodes of the test vocabulary.
fn names_codec() -> Codec {
    let factory: PacketFactory = Arc::new(|opcode, size, consumer| match opcode {
        C_MSG_ASKNAMELIST
        | S_MSG_RESPONDNAMELIST
        | C_MSG_ASKRANDOMNUMBER
        | S_MSG_RESPONDRANDOMNUMBER => Ok(Packet::new(opcode, consumer.read(size)?)),
        other => Err(NetError::Packet(format!("unknown opcode {other}"))),
    });
    Codec::new(factory)
}

struct NamesHandler;

impl ServerHandler for NamesHandler {
    fn process_client_packet(
        &self,
        server: &ServerHandle,
        client: Uuid,
        packet: &Packet,
    ) -> NetResult<()> {
        match packet.opcode() {
            C_MSG_ASKNAMELIST => {
                let mut body = &packet.body()[..];
                let amount = body.get_u64_le();
                let names: Vec<String> =
                    (1..=amount).map(|i| format!("Name_{i}")).collect();
                server.send(
                    client,
                    &Packet::new(S_MSG_RESPONDNAMELIST, encode_name_list(&names)),
                )
            }
            C_MSG_ASKRANDOMNUMBER => {
                let nanos = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos();
                let number = (nanos % 100) as i32;
                let mut buf = BytesMut::new();
                buf.put_i32_le(number);
                server.send(client, &Packet::new(S_MSG_RESPONDRANDOMNUMBER, buf.freeze()))
            }
            other => Err(NetError::Packet(format!("unexpected opcode {other}"))),
        }
    }
}

#[test]
fn name_list_request() {
    let port = free_port();
    let server = Server::new(Protocol::IPv4, names_codec(), 5, Arc::new(NamesHandler));
    server.connect("127.0.0.1", port).unwrap();

    let mut client = Client::new(Protocol::IPv4, names_codec(), 5);
    client.connect("127.0.0.1", port).unwrap();

    let mut request = BytesMut::new();
    request.put_u64_le(3);
    let reply = client
        .send(&Packet::new(C_MSG_ASKNAMELIST, request.freeze()))
        .unwrap();

    assert_eq!(reply.opcode(), S_MSG_RESPONDNAMELIST);
    assert_eq!(
        decode_name_list(reply.body()),
        vec!["Name_1".to_string(), "Name_2".to_string(), "Name_3".to_string()]
    );

    client.disconnect();
    server.disconnect();
}

#[test]
fn random_number_request() {
    let port = free_port();
    let server = Server::new(Protocol::IPv4, names_codec(), 5, Arc::new(NamesHandler));
    server.connect("127.0.0.1", port).unwrap();

    let mut client = Client::new(Protocol::IPv4, names_codec(), 5);
    client.connect("127.0.0.1", port).unwrap();

    let reply = client.send(&Packet::empty(C_MSG_ASKRANDOMNUMBER)).unwrap();
    assert_eq!(reply.opcode(), S_MSG_RESPONDRANDOMNUMBER);
    let number = (&reply.body()[..]).get_i32_le();
    assert!((0..=99).contains(&number), "got {number}");

    client.disconnect();
    server.disconnect();
}

#[test]
fn handler_error_disconnects_only_that_client() {
    let port = free_port();
    let server = Server::new(Protocol::IPv4, names_codec(), 5, Arc::new(NamesHandler));
    server.connect("127.0.0.1", port).unwrap();

    // This client sends an opcode the server codec refuses; its session is
    // torn down by the reader thread (the reply, if any, is the sentinel).
    let mut bad_client = Client::new(Protocol::IPv4, passthrough_codec(), 1);
    bad_client.connect("127.0.0.1", port).unwrap();
    let _ = bad_client.send(&Packet::empty(0x7777));

    let mut drained = false;
    for _ in 0..100 {
        if server.client_count() == 0 {
            drained = true;
            break;
        }
        thread::sleep(std::time::Duration::from_millis(20));
    }
    assert!(drained, "offending session was not cleaned up");

    // The server keeps serving well-behaved clients.
    let mut good_client = Client::new(Protocol::IPv4, names_codec(), 5);
    good_client.connect("127.0.0.1", port).unwrap();
    let reply = good_client
        .send(&Packet::empty(C_MSG_ASKRANDOMNUMBER))
        .unwrap();
    assert_eq!(reply.opcode(), S_MSG_RESPONDRANDOMNUMBER);

    good_client.disconnect();
    bad_client.disconnect();
    server.disconnect();
}
