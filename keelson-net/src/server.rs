//! Server dispatcher: accept loop, per-client reader threads, handler
//! dispatch and orderly shutdown.
//!
//! All three uuid-keyed maps (sockets including the listener under the
//! self uuid, input pipelines, output pipelines) live behind one mutex so
//! insertion and removal stay atomic; reader threads are tracked behind a
//! second mutex. Lock order is always the client maps first, and no join
//! ever happens while a lock is held.

use crate::codec::Codec;
use crate::endpoint::Endpoint;
use crate::error::{NetError, NetResult};
use crate::frame::Frame;
use crate::packet::Packet;
use crate::proto::{ConnectionStatus, Protocol, ReadResult};
use crate::sock::client::ClientSock;
use crate::sock::server::ServerSock;
use hashbrown::HashMap;
use keelson_core::pipeline::Pipeline;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, trace, warn};
use uuid::Uuid;

// Readiness window of one accept-loop iteration.
const ACCEPT_LOOP_WAIT: Duration = Duration::from_secs(1);

/// Application hooks driving a [`Server`].
///
/// `process_client_packet` runs on the owning client's reader thread; a
/// returned error disconnects that client only, never the whole server. The
/// pipeline hooks run once per accepted client and default to the identity.
pub trait ServerHandler: Send + Sync + 'static {
    fn process_client_packet(
        &self,
        server: &ServerHandle,
        client: Uuid,
        packet: &Packet,
    ) -> NetResult<()>;

    fn client_input_pipeline(&self, _client: Uuid) -> Pipeline {
        Pipeline::new()
    }

    fn client_output_pipeline(&self, _client: Uuid) -> Pipeline {
        Pipeline::new()
    }
}

enum Entry {
    Listener(Arc<ServerSock>),
    Client(Arc<ClientSock>),
}

#[derive(Default)]
struct ClientMaps {
    clients: HashMap<Uuid, Entry>,
    in_pipelines: HashMap<Uuid, Pipeline>,
    out_pipelines: HashMap<Uuid, Pipeline>,
}

struct Shared {
    endpoint: Endpoint,
    handler: Arc<dyn ServerHandler>,
    self_uuid: Mutex<Option<Uuid>>,
    maps: Mutex<ClientMaps>,
    reader_tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// Owning server endpoint. Dropping it shuts the server down.
pub struct Server {
    shared: Arc<Shared>,
}

/// Cheap cloneable reference to a running server, handed to background
/// threads and to [`ServerHandler`] callbacks for sending replies.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl Server {
    #[must_use]
    pub fn new(
        protocol: Protocol,
        codec: Codec,
        timeout_secs: u16,
        handler: Arc<dyn ServerHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                endpoint: Endpoint::new(protocol, codec, timeout_secs),
                handler,
                self_uuid: Mutex::new(None),
                maps: Mutex::new(ClientMaps::default()),
                reader_tasks: Mutex::new(HashMap::new()),
                accept_task: Mutex::new(None),
            }),
        }
    }

    /// Bind, listen and start serving.
    ///
    /// Inserts the listening socket into the client map under the self
    /// uuid, spawns the accept thread and transitions to `Connected`.
    pub fn connect(&self, host: &str, port: u16) -> NetResult<()> {
        let shared = &self.shared;
        if shared.endpoint.status().is_alive() {
            return Err(NetError::connection("server is already running"));
        }

        let listener = Arc::new(ServerSock::new(shared.endpoint.protocol()));
        let self_uuid = listener.uuid();
        *shared.self_uuid.lock() = Some(self_uuid);
        shared
            .maps
            .lock()
            .clients
            .insert(self_uuid, Entry::Listener(Arc::clone(&listener)));

        shared.endpoint.set_status(ConnectionStatus::Connecting);
        if let Err(e) = listener.listen(host, port) {
            shared.endpoint.set_status(ConnectionStatus::Disconnected);
            shared.maps.lock().clients.remove(&self_uuid);
            return Err(e);
        }

        let handle = self.handle();
        let accept_task = thread::Builder::new()
            .name("keelson-accept".into())
            .spawn(move || accept_loop(&handle))
            .map_err(|e| NetError::connection(format!("cannot spawn accept thread: {e}")))?;
        *shared.accept_task.lock() = Some(accept_task);

        shared.endpoint.set_status(ConnectionStatus::Connected);
        trace!(host, port, "server started and listening");
        Ok(())
    }

    /// Stop serving: close the listener, join the accept thread, force
    /// every client shut, join every reader thread, clear all maps.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.endpoint.status()
    }

    /// Reference for handler callbacks and background threads.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of live client sessions (the listener does not count).
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared.client_count()
    }

    /// Send a packet to one connected client.
    pub fn send(&self, client: Uuid, packet: &Packet) -> NetResult<()> {
        self.shared.send_to(client, packet)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.disconnect();
    }
}

impl ServerHandle {
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.endpoint.status()
    }

    /// Send a packet to one connected client.
    pub fn send(&self, client: Uuid, packet: &Packet) -> NetResult<()> {
        self.shared.send_to(client, packet)
    }

    /// Force one client's session shut; its reader thread cleans up.
    pub fn disconnect_client(&self, client: Uuid) {
        if let Some(sock) = self.shared.client(client) {
            sock.disconnect();
        }
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared.client_count()
    }
}

impl Shared {
    fn listener(&self) -> Option<Arc<ServerSock>> {
        let self_uuid = (*self.self_uuid.lock())?;
        match self.maps.lock().clients.get(&self_uuid) {
            Some(Entry::Listener(listener)) => Some(Arc::clone(listener)),
            _ => None,
        }
    }

    fn client(&self, uuid: Uuid) -> Option<Arc<ClientSock>> {
        match self.maps.lock().clients.get(&uuid) {
            Some(Entry::Client(client)) => Some(Arc::clone(client)),
            _ => None,
        }
    }

    fn client_count(&self) -> usize {
        self.maps
            .lock()
            .clients
            .values()
            .filter(|entry| matches!(entry, Entry::Client(_)))
            .count()
    }

    fn register_client(&self, client: ClientSock, handle: &ServerHandle) {
        let uuid = client.uuid();
        let in_pipeline = self.handler.client_input_pipeline(uuid);
        let out_pipeline = self.handler.client_output_pipeline(uuid);
        let client = Arc::new(client);

        {
            let mut maps = self.maps.lock();
            maps.clients.insert(uuid, Entry::Client(Arc::clone(&client)));
            maps.in_pipelines.insert(uuid, in_pipeline);
            maps.out_pipelines.insert(uuid, out_pipeline);
        }

        let reader_handle = handle.clone();
        match thread::Builder::new()
            .name(format!("keelson-reader-{uuid}"))
            .spawn(move || reader_loop(&reader_handle, uuid))
        {
            Ok(task) => {
                self.reader_tasks.lock().insert(uuid, task);
                trace!(%uuid, "client registered");
            }
            Err(e) => {
                error!(error = %e, %uuid, "cannot spawn reader thread");
                client.disconnect();
                let mut maps = self.maps.lock();
                maps.clients.remove(&uuid);
                maps.in_pipelines.remove(&uuid);
                maps.out_pipelines.remove(&uuid);
            }
        }
    }

    /// Receive and decode one packet from a client.
    fn receive_from(&self, uuid: Uuid) -> NetResult<Packet> {
        let (client, in_pipeline) = {
            let maps = self.maps.lock();
            let client = match maps.clients.get(&uuid) {
                Some(Entry::Client(client)) => Arc::clone(client),
                _ => return Err(NetError::closed(format!("unknown client {uuid}"))),
            };
            let in_pipeline = maps.in_pipelines.get(&uuid).cloned().unwrap_or_default();
            (client, in_pipeline)
        };

        let frame = Frame::read_from(&client, &in_pipeline);
        self.endpoint.codec().decode(&frame.to_consumer())
    }

    fn send_to(&self, uuid: Uuid, packet: &Packet) -> NetResult<()> {
        let (client, out_pipeline) = {
            let maps = self.maps.lock();
            let client = match maps.clients.get(&uuid) {
                Some(Entry::Client(client)) => Arc::clone(client),
                _ => return Err(NetError::closed(format!("unknown client {uuid}"))),
            };
            let out_pipeline = maps.out_pipelines.get(&uuid).cloned().unwrap_or_default();
            (client, out_pipeline)
        };

        let frame = Frame::from_packet(packet);
        let consumer = frame.to_wire(&out_pipeline)?;
        client.send_consumer(&consumer)
    }

    fn disconnect(&self) {
        if !self.endpoint.status().is_alive() {
            return;
        }
        self.endpoint.set_status(ConnectionStatus::Disconnecting);

        // Close the listener first so the accept wait is guaranteed to
        // return, then join the accept thread.
        if let Some(listener) = self.listener() {
            listener.disconnect();
        }
        if let Some(task) = self.accept_task.lock().take() {
            let _ = task.join();
        }

        // Snapshot under the lock, disconnect outside it: a reader thread
        // needs the same lock to remove itself on normal exit.
        let clients: Vec<Arc<ClientSock>> = {
            let maps = self.maps.lock();
            maps.clients
                .values()
                .filter_map(|entry| match entry {
                    Entry::Client(client) => Some(Arc::clone(client)),
                    Entry::Listener(_) => None,
                })
                .collect()
        };
        for client in clients {
            client.disconnect();
        }

        let tasks: Vec<(Uuid, JoinHandle<()>)> =
            self.reader_tasks.lock().drain().collect();
        for (_, task) in tasks {
            let _ = task.join();
        }

        {
            let mut maps = self.maps.lock();
            maps.clients.clear();
            maps.in_pipelines.clear();
            maps.out_pipelines.clear();
        }

        self.endpoint.set_status(ConnectionStatus::Disconnected);
        trace!("server stopped and disconnected");
    }
}

fn accept_loop(handle: &ServerHandle) {
    trace!("accept thread started");
    let shared = &handle.shared;

    while shared.endpoint.status() == ConnectionStatus::Connected {
        let Some(listener) = shared.listener() else {
            error!("accept thread: listening socket missing");
            return;
        };

        match listener.wait_for_data(ACCEPT_LOOP_WAIT) {
            Ok(ReadResult::Success) => match listener.accept() {
                Ok(client) => shared.register_client(client, handle),
                Err(NetError::AcceptTimeout) => {
                    trace!("pending connection vanished before accept");
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return;
                }
            },
            Ok(ReadResult::Timeout) => {
                trace!("accept wait timed out, continuing");
            }
            Ok(ReadResult::Closed) => {
                trace!("listening socket closed, stopping accept loop");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "accept wait failed");
                return;
            }
        }
    }

    trace!("accept thread stopped");
}

fn reader_loop(handle: &ServerHandle, uuid: Uuid) {
    trace!(%uuid, "reader thread started");
    let shared = &handle.shared;

    loop {
        if !shared.endpoint.status().is_alive() {
            break;
        }
        // Re-resolve through the map each pass; the map is the owner and
        // this snapshot is a short-lived observer.
        let Some(client) = shared.client(uuid) else {
            break;
        };
        if !client.status().is_alive() {
            break;
        }

        match client.wait_for_data(Duration::ZERO) {
            Ok(ReadResult::Success) => {
                if client.has_shutdown_request() {
                    trace!(%uuid, "client requested shutdown, disconnecting");
                    client.disconnect();
                    break;
                }
                match shared.receive_from(uuid) {
                    Ok(packet) => {
                        if let Err(e) =
                            shared.handler.process_client_packet(handle, uuid, &packet)
                        {
                            error!(error = %e, %uuid, "handler rejected packet");
                            client.disconnect();
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, %uuid, "failed to decode client packet");
                        client.disconnect();
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                trace!(error = %e, %uuid, "client wait ended");
                client.disconnect();
                break;
            }
        }
    }

    // Removal of all three entries is atomic under the maps mutex.
    {
        let mut maps = shared.maps.lock();
        maps.clients.remove(&uuid);
        maps.in_pipelines.remove(&uuid);
        maps.out_pipelines.remove(&uuid);
    }
    trace!(%uuid, "reader thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketFactory;

    struct EchoHandler;

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

    fn codec() -> Codec {
        let factory: PacketFactory = Arc::new(|opcode, size, consumer| {
            Ok(Packet::new(opcode, consumer.read(size)?))
        });
        Codec::new(factory)
    }

    fn free_port() -> u16 {
        portpicker::pick_unused_port().expect("no free port")
    }

    #[test]
    fn connect_then_disconnect_empties_state() {
        let server = Server::new(Protocol::IPv4, codec(), 5, Arc::new(EchoHandler));
        server.connect("127.0.0.1", free_port()).unwrap();
        assert_eq!(server.status(), ConnectionStatus::Connected);
        assert_eq!(server.client_count(), 0);

        server.disconnect();
        assert_eq!(server.status(), ConnectionStatus::Disconnected);
        assert_eq!(server.client_count(), 0);
        assert!(server.shared.maps.lock().clients.is_empty());
        assert!(server.shared.reader_tasks.lock().is_empty());
    }

    #[test]
    fn connect_twice_is_rejected() {
        let server = Server::new(Protocol::IPv4, codec(), 5, Arc::new(EchoHandler));
        server.connect("127.0.0.1", free_port()).unwrap();
        assert!(server.connect("127.0.0.1", free_port()).is_err());
        server.disconnect();
    }

    #[test]
    fn failed_listen_reverts_cleanly() {
        let server = Server::new(Protocol::IPv4, codec(), 5, Arc::new(EchoHandler));
        // Binding to a host that does not resolve must fail and leave the
        // server reusable.
        assert!(server.connect("nonexistent.host.invalid", 0).is_err());
        assert_eq!(server.status(), ConnectionStatus::Disconnected);
        assert!(server.shared.maps.lock().clients.is_empty());
    }

    #[test]
    fn send_to_unknown_client_fails() {
        let server = Server::new(Protocol::IPv4, codec(), 5, Arc::new(EchoHandler));
        let err = server.send(Uuid::new_v4(), &Packet::empty(1)).unwrap_err();
        assert!(matches!(err, NetError::ConnectionClosed(_)));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let server = Server::new(Protocol::IPv4, codec(), 5, Arc::new(EchoHandler));
        server.connect("127.0.0.1", free_port()).unwrap();
        server.disconnect();
        server.disconnect();
        assert_eq!(server.status(), ConnectionStatus::Disconnected);
    }
}
