//! Socket core: ownership of one OS handle, non-blocking IO and
//! event-driven readiness waits.
//!
//! # Safety
//!
//! This module uses unsafe code to hand raw file descriptors/sockets to the
//! readiness poller and to query the path MTU. The unsafe operations are
//! encapsulated and safe to use from the public API.

#![allow(unsafe_code)]

pub mod client;
pub mod server;

use crate::error::{NetError, NetResult};
use crate::info::{ConnInfo, DEFAULT_MTU};
use crate::init;
use crate::proto::{AtomicStatus, ConnectionStatus, Protocol, ReadResult};
use mio::{Events, Interest, Poll, Token};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use socket2::{Domain, Socket, Type};
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{trace, warn};
use uuid::Uuid;

/// Per-syscall IO cap applied to both send and recv.
pub const MAX_SINGLE_IO: usize = 4 * 1024 * 1024;

// Requested kernel buffer size; the effective value is read back after the
// request and may be larger (system maxima) or smaller (clamped).
const SOCKET_BUFFER_SIZE: usize = 262_144;
const FALLBACK_CHUNK: usize = 65_536;

// Minimum readiness wait; callers asking for less would busy-poll.
const MIN_WAIT: Duration = Duration::from_millis(10);
// Grace before close so the FIN can propagate.
const DISCONNECT_GRACE: Duration = Duration::from_millis(100);

/// Owner of one OS socket handle.
///
/// The handle is valid iff the status is not `Disconnected`; the uuid is
/// assigned at construction, never changes, and is the identity the server
/// keys its maps by.
#[derive(Debug)]
pub struct TcpSock {
    protocol: Protocol,
    status: AtomicStatus,
    handle: RwLock<Option<Socket>>,
    info: RwLock<Option<ConnInfo>>,
    mtu: AtomicU32,
    uuid: Uuid,
    send_cap: AtomicUsize,
    recv_cap: AtomicUsize,
}

impl TcpSock {
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        // Platform networking must be up before the first socket() call.
        let _ = init::runtime();
        Self {
            protocol,
            status: AtomicStatus::new(ConnectionStatus::Disconnected),
            handle: RwLock::new(None),
            info: RwLock::new(None),
            mtu: AtomicU32::new(u32::from(DEFAULT_MTU)),
            uuid: Uuid::new_v4(),
            send_cap: AtomicUsize::new(0),
            recv_cap: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.load()
    }

    /// Descriptor of the resolved peer, once known.
    #[must_use]
    pub fn peer_info(&self) -> Option<ConnInfo> {
        self.info.read().clone()
    }

    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Relaxed) as u16
    }

    /// Per-call send chunk capacity, set once connected.
    #[must_use]
    pub fn send_cap(&self) -> usize {
        self.send_cap.load(Ordering::Relaxed)
    }

    /// Per-call receive chunk capacity, set once connected.
    #[must_use]
    pub fn recv_cap(&self) -> usize {
        self.recv_cap.load(Ordering::Relaxed)
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status);
    }

    pub(crate) fn install_info(&self, info: ConnInfo) {
        *self.info.write() = Some(info);
    }

    /// Allocate the OS handle for the configured family.
    pub(crate) fn create_handle(&self) -> NetResult<()> {
        let _ = init::runtime();
        let domain = match self.protocol {
            Protocol::IPv4 => Domain::IPV4,
            Protocol::IPv6 => Domain::IPV6,
        };
        let sock = Socket::new(domain, Type::STREAM, None).map_err(|e| {
            self.status.store(ConnectionStatus::Disconnected);
            NetError::SocketCreate(e.to_string())
        })?;
        *self.handle.write() = Some(sock);
        Ok(())
    }

    /// Drop the handle after a failed connect/listen attempt.
    pub(crate) fn release_handle(&self) {
        *self.handle.write() = None;
        self.status.store(ConnectionStatus::Disconnected);
    }

    pub(crate) fn install_handle(&self, sock: Socket) {
        *self.handle.write() = Some(sock);
    }

    /// Switch to non-blocking mode, disable Nagle, request large kernel
    /// buffers and record the effective per-call chunk capacities. Ends in
    /// the `Connected` state.
    pub(crate) fn initialize_after_connect(&self) {
        self.status.store(ConnectionStatus::Connecting);

        let guard = self.handle.read();
        let Some(sock) = guard.as_ref() else {
            return;
        };

        if let Err(e) = sock.set_nonblocking(true) {
            warn!(error = %e, "failed to switch socket to non-blocking mode");
        }

        let mut send_buf = SOCKET_BUFFER_SIZE;
        let mut recv_buf = SOCKET_BUFFER_SIZE;

        #[cfg(target_os = "linux")]
        {
            // Prefer the system maxima when they exceed our default request.
            if let Some(wmem_max) = read_proc_usize("/proc/sys/net/core/wmem_max") {
                trace!(wmem_max, "system wmem_max");
                send_buf = send_buf.max(wmem_max);
            }
            if let Some(rmem_max) = read_proc_usize("/proc/sys/net/core/rmem_max") {
                trace!(rmem_max, "system rmem_max");
                recv_buf = recv_buf.max(rmem_max);
            }
        }

        if let Err(e) = sock.set_send_buffer_size(send_buf) {
            warn!(error = %e, "setsockopt(SO_SNDBUF) failed");
        }
        if let Err(e) = sock.set_recv_buffer_size(recv_buf) {
            warn!(error = %e, "setsockopt(SO_RCVBUF) failed");
        }

        let effective_send = sock.send_buffer_size().unwrap_or(0);
        let effective_recv = sock.recv_buffer_size().unwrap_or(0);
        trace!(effective_send, effective_recv, "effective socket buffer sizes");

        let send_cap = clamp_cap(effective_send);
        let recv_cap = clamp_cap(effective_recv);
        self.send_cap.store(send_cap, Ordering::Relaxed);
        self.recv_cap.store(recv_cap, Ordering::Relaxed);
        trace!(
            send_cap,
            recv_cap,
            max_single_io = MAX_SINGLE_IO,
            "per-call chunk capacities"
        );

        // Nagle off: small request/reply frames must not wait for coalescing.
        if let Err(e) = sock.set_nodelay(true) {
            warn!(error = %e, "setsockopt(TCP_NODELAY) failed");
        }

        self.mtu
            .store(u32::from(query_mtu(sock).unwrap_or(DEFAULT_MTU)), Ordering::Relaxed);

        self.status.store(ConnectionStatus::Connected);
    }

    /// Bidirectional shutdown followed by close, with a short grace period
    /// so the FIN reaches the peer. Safe to call more than once.
    pub fn disconnect(&self) {
        if self.status.load().is_alive() {
            self.status.store(ConnectionStatus::Disconnecting);
            {
                let guard = self.handle.read();
                if let Some(sock) = guard.as_ref() {
                    let _ = sock.shutdown(std::net::Shutdown::Both);
                }
            }
            thread::sleep(DISCONNECT_GRACE);
        }

        if self.handle.write().take().is_some() {
            trace!(uuid = %self.uuid, "disconnected socket");
        }
        self.status.store(ConnectionStatus::Disconnected);
    }

    /// Block until the socket is readable, the deadline expires or the
    /// connection dies.
    ///
    /// A zero `timeout` waits indefinitely; any other value is rounded up to
    /// a 10 ms minimum to avoid busy polling. Returns `Closed` when events
    /// arrive but the status has left `Connected` (including a concurrent
    /// [`TcpSock::disconnect`] mid-wait).
    pub fn wait_for_data(&self, timeout: Duration) -> NetResult<ReadResult> {
        if !self.status.load().is_alive() {
            return Err(NetError::closed(
                "failed to wait for data: invalid connection status",
            ));
        }

        trace_waiting_gated();

        let effective = if timeout.is_zero() {
            None
        } else {
            Some(timeout.max(MIN_WAIT))
        };

        let guard = self.handle.read();
        let Some(sock) = guard.as_ref() else {
            return Err(NetError::closed("failed to wait for data: no socket handle"));
        };

        match wait_readiness(sock, Interest::READABLE, effective) {
            Ok(true) => {
                if self.status.load() == ConnectionStatus::Connected {
                    Ok(ReadResult::Success)
                } else {
                    Ok(ReadResult::Closed)
                }
            }
            Ok(false) => Ok(ReadResult::Timeout),
            Err(e) => Err(map_wait_error(&e)),
        }
    }

    /// Run `op` with the raw handle, failing when the socket is gone.
    pub(crate) fn with_handle<T>(
        &self,
        op: impl FnOnce(&Socket) -> NetResult<T>,
    ) -> NetResult<T> {
        let guard = self.handle.read();
        match guard.as_ref() {
            Some(sock) => op(sock),
            None => Err(NetError::closed("socket handle is gone")),
        }
    }
}

impl Drop for TcpSock {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn clamp_cap(effective: usize) -> usize {
    let cap = if effective == 0 { FALLBACK_CHUNK } else { effective };
    cap.min(MAX_SINGLE_IO)
}

fn map_wait_error(e: &io::Error) -> NetError {
    match e.raw_os_error() {
        #[cfg(unix)]
        Some(code) if code == libc::ECONNRESET || code == libc::EBADF => {
            NetError::closed("connection closed or invalid socket")
        }
        _ => NetError::closed(format!("failed to wait for data: {e}")),
    }
}

#[cfg(target_os = "linux")]
fn read_proc_usize(path: &str) -> Option<usize> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<usize>()
        .ok()
}

/// Path MTU of the connected socket, when the platform exposes it.
#[cfg(target_os = "linux")]
fn query_mtu(sock: &Socket) -> Option<u16> {
    use std::os::fd::AsRawFd;

    let fd = sock.as_raw_fd();
    let mut mtu: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_MTU,
            std::ptr::addr_of_mut!(mtu).cast(),
            &mut len,
        )
    };
    if rc == 0 && mtu > 0 {
        Some(mtu.min(i32::from(u16::MAX)) as u16)
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn query_mtu(_sock: &Socket) -> Option<u16> {
    None
}

// "Waiting for data" is traced at most once per process-second across all
// threads; the gate is a single atomic deadline in process-relative millis.
static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);
static NEXT_WAIT_LOG_MS: AtomicU64 = AtomicU64::new(0);

fn trace_waiting_gated() {
    let now_ms = PROCESS_START.elapsed().as_millis() as u64;
    let next = NEXT_WAIT_LOG_MS.load(Ordering::Relaxed);
    if now_ms >= next
        && NEXT_WAIT_LOG_MS
            .compare_exchange(next, now_ms + 1000, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    {
        trace!("waiting for data on socket");
    }
}

#[cfg(test)]
pub(crate) fn wait_log_gate_passes() -> bool {
    let now_ms = PROCESS_START.elapsed().as_millis() as u64;
    let next = NEXT_WAIT_LOG_MS.load(Ordering::Relaxed);
    now_ms >= next
        && NEXT_WAIT_LOG_MS
            .compare_exchange(next, now_ms + 1000, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
}

/// One-shot event-driven readiness wait on a raw socket handle.
///
/// A fresh poller per call mirrors a one-shot epoll instance: current
/// readiness is always reported, so edge-trigger re-arm semantics cannot
/// swallow data that arrived before registration.
///
/// Returns `Ok(true)` when ready, `Ok(false)` on timeout.
#[cfg(unix)]
fn wait_readiness(
    sock: &Socket,
    interest: Interest,
    timeout: Option<Duration>,
) -> io::Result<bool> {
    use mio::unix::SourceFd;
    use std::os::fd::AsRawFd;

    let fd = sock.as_raw_fd();
    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut SourceFd(&fd), Token(0), interest)?;

    poll_until(&mut poll, timeout)
}

#[cfg(windows)]
fn wait_readiness(
    sock: &Socket,
    interest: Interest,
    timeout: Option<Duration>,
) -> io::Result<bool> {
    use std::os::windows::io::{AsRawSocket, FromRawSocket, IntoRawSocket};

    let raw = sock.as_raw_socket();
    // Re-wrap the raw handle for registration only; into_raw_socket below
    // releases it again so the owner keeps the only closing reference.
    let std_stream = unsafe { std::net::TcpStream::from_raw_socket(raw) };
    let mut stream = mio::net::TcpStream::from_std(std_stream);

    let mut poll = Poll::new()?;
    let result = poll
        .registry()
        .register(&mut stream, Token(0), interest)
        .and_then(|()| poll_until(&mut poll, timeout));
    let _ = poll.registry().deregister(&mut stream);
    let _ = stream.into_raw_socket();
    result
}

fn poll_until(poll: &mut Poll, timeout: Option<Duration>) -> io::Result<bool> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut events = Events::with_capacity(4);

    loop {
        let remaining = match deadline {
            None => None,
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                Some(deadline - now)
            }
        };

        match poll.poll(&mut events, remaining) {
            Ok(()) => {
                if events.is_empty() {
                    if deadline.is_none() {
                        continue;
                    }
                    return Ok(false);
                }
                return Ok(true);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_socket_starts_disconnected() {
        let sock = TcpSock::new(Protocol::IPv4);
        assert_eq!(sock.status(), ConnectionStatus::Disconnected);
        assert_eq!(sock.mtu(), DEFAULT_MTU);
        assert_eq!(sock.send_cap(), 0);
    }

    #[test]
    fn uuid_is_stable_and_unique() {
        let a = TcpSock::new(Protocol::IPv4);
        let b = TcpSock::new(Protocol::IPv4);
        assert_ne!(a.uuid(), b.uuid());
        assert_eq!(a.uuid(), a.uuid());
    }

    #[test]
    fn wait_on_disconnected_socket_fails() {
        let sock = TcpSock::new(Protocol::IPv4);
        assert!(matches!(
            sock.wait_for_data(Duration::from_millis(1)),
            Err(NetError::ConnectionClosed(_))
        ));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let sock = TcpSock::new(Protocol::IPv4);
        sock.disconnect();
        sock.disconnect();
        assert_eq!(sock.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn wait_log_gate_fires_once_per_second() {
        // Drain the gate, then it must hold for the rest of the current
        // second.
        while wait_log_gate_passes() {}
        assert!(!wait_log_gate_passes());
    }

    #[test]
    fn cap_clamping() {
        assert_eq!(clamp_cap(0), FALLBACK_CHUNK);
        assert_eq!(clamp_cap(1024), 1024);
        assert_eq!(clamp_cap(usize::MAX), MAX_SINGLE_IO);
    }
}
