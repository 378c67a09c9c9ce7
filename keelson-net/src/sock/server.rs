//! Listening TCP socket: bind, accept, and forced teardown of accepted
//! sessions.

use super::client::ClientSock;
use super::{wait_readiness, TcpSock};
use crate::error::{NetError, NetResult};
use crate::info::ConnInfo;
use crate::proto::{ConnectionStatus, Protocol, ReadResult};
use mio::Interest;
use parking_lot::Mutex;
use socket2::Socket;
use std::io;
use std::time::Duration;
use tracing::{trace, warn};

// Readiness window for a single accept attempt.
const ACCEPT_WAIT: Duration = Duration::from_millis(200);

#[cfg(unix)]
const LISTEN_BACKLOG: i32 = libc::SOMAXCONN;
#[cfg(not(unix))]
const LISTEN_BACKLOG: i32 = 128;

/// Listening socket.
///
/// Accepted sessions are handed out as [`ClientSock`]s; a cloned observer
/// handle for each one is retained so [`ServerSock::disconnect`] can force
/// every session shut even when the owners are parked in reads.
#[derive(Debug)]
pub struct ServerSock {
    core: TcpSock,
    accepted: Mutex<Vec<Socket>>,
}

impl ServerSock {
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            core: TcpSock::new(protocol),
            accepted: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn core(&self) -> &TcpSock {
        &self.core
    }

    #[must_use]
    pub fn uuid(&self) -> uuid::Uuid {
        self.core.uuid()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.core.status()
    }

    pub fn wait_for_data(&self, timeout: Duration) -> NetResult<ReadResult> {
        self.core.wait_for_data(timeout)
    }

    /// Bind and listen. Any failure reverts to `Disconnected` and frees the
    /// handle.
    pub fn listen(&self, host: &str, port: u16) -> NetResult<()> {
        trace!(host, port, "starting to listen");

        if self.core.status() != ConnectionStatus::Disconnected {
            return Err(NetError::connection("server socket is already listening"));
        }

        self.core.set_status(ConnectionStatus::Connecting);
        self.core.create_handle()?;

        let info = match ConnInfo::from_host(host, port, self.core.protocol()) {
            Ok(info) => info,
            Err(e) => {
                self.core.release_handle();
                return Err(e);
            }
        };

        let setup = self.core.with_handle(|sock| {
            sock.set_reuse_address(true)
                .map_err(|e| NetError::Connection(format!("setsockopt(SO_REUSEADDR): {e}")))?;
            sock.bind(&info.addr().into())
                .map_err(|e| NetError::Connection(format!("bind: {e}")))?;
            sock.listen(LISTEN_BACKLOG)
                .map_err(|e| NetError::Connection(format!("listen: {e}")))?;
            Ok(())
        });
        if let Err(e) = setup {
            self.core.release_handle();
            return Err(e);
        }

        self.core.install_info(info);
        self.core.initialize_after_connect();
        trace!(host, port, "listening");
        Ok(())
    }

    /// Accept one incoming connection, waiting up to 200 ms.
    ///
    /// Returns [`NetError::AcceptTimeout`] when nothing arrived in the
    /// window; callers are expected to retry.
    pub fn accept(&self) -> NetResult<ClientSock> {
        let ready = self.core.with_handle(|sock| {
            wait_readiness(sock, Interest::READABLE, Some(ACCEPT_WAIT))
                .map_err(|e| NetError::Connection(format!("accept poll: {e}")))
        })?;
        if !ready {
            return Err(NetError::AcceptTimeout);
        }

        let (accepted, peer) = self.core.with_handle(|sock| match sock.accept() {
            Ok(pair) => Ok(pair),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(NetError::AcceptTimeout),
            Err(e) => Err(NetError::Connection(format!("accept: {e}"))),
        })?;

        // Keep an observer handle so a server-side shutdown can reach
        // sessions whose owners are parked inside reads.
        match accepted.try_clone() {
            Ok(observer) => self.accepted.lock().push(observer),
            Err(e) => warn!(error = %e, "could not track accepted socket"),
        }

        let info = peer.as_socket().map_or_else(
            || ConnInfo::from_addr(([0u8, 0, 0, 0], 0).into()),
            ConnInfo::from_addr,
        );
        trace!(peer = %info.ip(), port = info.port(), "accepted connection");

        Ok(ClientSock::from_accepted(self.core.protocol(), accepted, info))
    }

    /// Force every accepted session shut, then close the listener itself.
    pub fn disconnect(&self) {
        let observers = std::mem::take(&mut *self.accepted.lock());
        for observer in &observers {
            let _ = observer.shutdown(std::net::Shutdown::Both);
        }
        drop(observers);

        self.core.disconnect();
    }
}

impl Drop for ServerSock {
    fn drop(&mut self) {
        self.disconnect();
    }
}
