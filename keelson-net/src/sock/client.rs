//! Connected TCP socket with flow-controlled, chunked send and receive.

use super::{wait_readiness, TcpSock, FALLBACK_CHUNK, MAX_SINGLE_IO};
use crate::error::{NetError, NetResult};
use crate::info::ConnInfo;
use crate::proto::{ConnectionStatus, Protocol, ReadResult};
use bytes::Bytes;
use keelson_core::buffer::fifo::Fifo;
use keelson_core::buffer::stream::Consumer;
use mio::Interest;
use socket2::Socket;
use std::io;
use std::mem::MaybeUninit;
use std::thread;
use std::time::Duration;
use tracing::{error, trace};

// Write-readiness poll slice inside the send loop.
const SEND_POLL: Duration = Duration::from_millis(50);
// Wait slice while a read would block.
const RECV_WAIT: Duration = Duration::from_millis(100);

#[cfg(unix)]
const SEND_FLAGS: i32 = libc::MSG_NOSIGNAL;
#[cfg(not(unix))]
const SEND_FLAGS: i32 = 0;

// One bounded IO attempt. The socket handle lock is held only for the
// duration of a single attempt so a concurrent disconnect can always close
// the handle between attempts.
enum IoAttempt {
    Data(Bytes),
    Sent(usize),
    WouldBlock,
    Retry,
}

/// Client-side socket: the connected end of one TCP session.
#[derive(Debug)]
pub struct ClientSock {
    core: TcpSock,
}

impl ClientSock {
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            core: TcpSock::new(protocol),
        }
    }

    /// Wrap a handle accepted by a listener; finishes socket setup and ends
    /// `Connected`.
    pub(crate) fn from_accepted(protocol: Protocol, sock: Socket, info: ConnInfo) -> Self {
        let client = Self::new(protocol);
        client.core.install_handle(sock);
        client.core.install_info(info);
        client.core.initialize_after_connect();
        client
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

    pub fn disconnect(&self) {
        self.core.disconnect();
    }

    pub fn wait_for_data(&self, timeout: Duration) -> NetResult<ReadResult> {
        self.core.wait_for_data(timeout)
    }

    /// Resolve and connect. Requires the `Disconnected` state.
    pub fn connect(&self, host: &str, port: u16) -> NetResult<()> {
        trace!(host, port, "connecting");

        if self.core.status() != ConnectionStatus::Disconnected {
            error!("client is already connected");
            return Err(NetError::connection("client is already connected"));
        }

        self.core.set_status(ConnectionStatus::Connecting);
        self.core.create_handle()?;

        let info = match ConnInfo::from_host(host, port, self.core.protocol()) {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "failed to resolve host");
                self.core.release_handle();
                return Err(e);
            }
        };

        let connect_result = self.core.with_handle(|sock| {
            sock.connect(&info.addr().into())
                .map_err(|e| NetError::Connection(e.to_string()))
        });
        if let Err(e) = connect_result {
            error!(error = %e, "failed to connect");
            self.core.release_handle();
            return Err(e);
        }

        self.core.install_info(info);
        self.core.initialize_after_connect();
        trace!(host, port, "connected");
        Ok(())
    }

    /// Send a whole byte slice.
    ///
    /// Either every byte is transmitted or an error is returned; there is no
    /// partial success. Each iteration waits up to 50 ms for
    /// write-readiness, yields when the socket is not writable, and sends at
    /// most `min(send_cap, MAX_SINGLE_IO)` bytes per syscall.
    pub fn send(&self, data: &[u8]) -> NetResult<()> {
        if self.core.status() != ConnectionStatus::Connected {
            return Err(NetError::NotConnected);
        }

        let mut remaining = data;
        let mut total = 0usize;

        while !remaining.is_empty() {
            let writable = self.core.with_handle(|sock| {
                wait_readiness(sock, Interest::WRITABLE, Some(SEND_POLL))
                    .map_err(|e| NetError::Write(format!("poll error: {e}")))
            })?;
            if !writable {
                thread::yield_now();
                continue;
            }

            let cap = chunk_cap(self.core.send_cap()).min(remaining.len());
            let attempt = self.core.with_handle(|sock| {
                match sock.send_with_flags(&remaining[..cap], SEND_FLAGS) {
                    Ok(written) => Ok(IoAttempt::Sent(written)),
                    Err(e) if would_block(&e) => Ok(IoAttempt::WouldBlock),
                    Err(e) => {
                        error!(
                            error = %e,
                            code = e.raw_os_error().unwrap_or(0),
                            "send failed"
                        );
                        Err(NetError::Write(e.to_string()))
                    }
                }
            })?;

            if let IoAttempt::Sent(written) = attempt {
                total += written;
                remaining = &remaining[written..];
            }
        }

        trace!(total, "all data sent");
        Ok(())
    }

    /// Send the contents of a FIFO buffer.
    pub fn send_fifo(&self, mut fifo: Fifo) -> NetResult<()> {
        let data = fifo.extract();
        self.send(&data)
    }

    /// Drain a consumer onto the wire as data becomes available.
    ///
    /// Terminates once the stream is both drained and no longer writable.
    pub fn send_consumer(&self, data: &Consumer) -> NetResult<()> {
        if self.core.status() != ConnectionStatus::Connected {
            return Err(NetError::NotConnected);
        }

        loop {
            let available = data.available_bytes();
            if available == 0 {
                if !data.is_writable() {
                    break;
                }
                trace!("no data available to send yet, yielding");
                thread::yield_now();
                continue;
            }
            let chunk = data.read(available)?;
            self.send(&chunk)?;
        }

        Ok(())
    }

    /// Receive until the peer closes or data stops arriving.
    pub fn receive_all(&self) -> NetResult<Fifo> {
        self.receive(0)
    }

    /// Receive up to `max_size` bytes.
    ///
    /// `max_size == 0` reads until the peer closes or until some data has
    /// been received in a single wait cycle. A positive `max_size` delivers
    /// exactly that many bytes; a peer close before that point is a
    /// [`NetError::ConnectionClosed`].
    pub fn receive(&self, max_size: usize) -> NetResult<Fifo> {
        trace!(max_size, "starting read");

        let mut buffer = Fifo::new();
        let mut total = 0usize;

        loop {
            let cap = chunk_cap(self.core.recv_cap());
            let to_read = if max_size > 0 {
                cap.min(max_size - total)
            } else {
                cap
            };

            let attempt = self.core.with_handle(|sock| match recv_chunk(sock, to_read) {
                Ok(chunk) => Ok(IoAttempt::Data(chunk)),
                Err(e) if would_block(&e) => Ok(IoAttempt::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(IoAttempt::Retry),
                Err(e) => {
                    trace!(error = %e, "read error");
                    Err(NetError::Receive(e.to_string()))
                }
            })?;

            match attempt {
                IoAttempt::Data(chunk) if chunk.is_empty() => {
                    trace!("connection closed by peer");
                    if max_size > 0 && total < max_size {
                        return Err(NetError::closed(format!(
                            "peer closed after {total} of {max_size} bytes"
                        )));
                    }
                    break;
                }
                IoAttempt::Data(chunk) => {
                    trace!(size = chunk.len(), "chunk received");
                    total += chunk.len();
                    buffer.write(chunk);
                    if max_size > 0 && total >= max_size {
                        break;
                    }
                }
                IoAttempt::WouldBlock => match self.core.wait_for_data(RECV_WAIT) {
                    Ok(ReadResult::Timeout) => {
                        if max_size == 0 && total > 0 {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(_) if max_size == 0 => break,
                    Err(e) => return Err(e),
                },
                IoAttempt::Retry | IoAttempt::Sent(_) => {}
            }
        }

        trace!(total, "total data received");
        Ok(buffer)
    }

    /// Single-byte peek deciding whether the peer asked to shut down.
    ///
    /// True iff the peer closed the stream or a non-would-block error
    /// occurred; pending data and a clean would-block both mean false.
    #[must_use]
    pub fn has_shutdown_request(&self) -> bool {
        self.core
            .with_handle(|sock| Ok(peek_closed(sock)))
            .unwrap_or(true)
    }

    /// Liveness probe via the same single-byte peek.
    ///
    /// A failed probe drops the status to `Disconnected`.
    pub fn ping(&self) -> bool {
        if self.core.status() != ConnectionStatus::Connected {
            return false;
        }

        let alive = self
            .core
            .with_handle(|sock| Ok(!peek_closed(sock)))
            .unwrap_or(false);

        if alive {
            trace!("ping successful");
        } else {
            trace!("ping failed");
            self.core.set_status(ConnectionStatus::Disconnected);
        }
        alive
    }
}

fn chunk_cap(configured: usize) -> usize {
    let cap = if configured == 0 {
        FALLBACK_CHUNK
    } else {
        configured
    };
    cap.min(MAX_SINGLE_IO)
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

/// Read up to `max` bytes; an empty buffer means the peer closed.
#[allow(unsafe_code)]
fn recv_chunk(sock: &Socket, max: usize) -> io::Result<Bytes> {
    let mut buf: Vec<MaybeUninit<u8>> = vec![MaybeUninit::uninit(); max];
    let n = sock.recv(&mut buf)?;
    // recv initialized the first n bytes.
    let chunk = unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), n) };
    Ok(Bytes::copy_from_slice(chunk))
}

/// Peek one byte without consuming it; true iff the peer closed or the
/// socket errored (would-block is not an error here).
fn peek_closed(sock: &Socket) -> bool {
    let mut buf = [MaybeUninit::<u8>::uninit(); 1];

    #[cfg(unix)]
    let flags = libc::MSG_PEEK | libc::MSG_DONTWAIT;
    #[cfg(not(unix))]
    let flags = 2; // MSG_PEEK; the socket is already non-blocking

    match sock.recv_with_flags(&mut buf, flags) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => !would_block(&e),
    }
}
