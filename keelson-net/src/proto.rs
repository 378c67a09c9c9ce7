//! Protocol family, connection status and readiness results.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// IP protocol family. Immutable per socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    IPv4,
    IPv6,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IPv4 => write!(f, "IPv4"),
            Self::IPv6 => write!(f, "IPv6"),
        }
    }
}

/// Connection lifecycle state.
///
/// Transitions are monotonic within a session: `Disconnected → Connecting →
/// {Connected | Disconnected}`, `Connected → Disconnecting → Disconnected`;
/// any state may move to `Error`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Negotiating = 3,
    Disconnecting = 4,
    PeerClosed = 5,
    Rejected = 6,
    Error = 7,
}

impl ConnectionStatus {
    /// A socket is alive iff it is `Connected` or `Negotiating`.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Connected | Self::Negotiating)
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Negotiating,
            4 => Self::Disconnecting,
            5 => Self::PeerClosed,
            6 => Self::Rejected,
            7 => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Negotiating => "negotiating",
            Self::Disconnecting => "disconnecting",
            Self::PeerClosed => "peer closed",
            Self::Rejected => "rejected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// Readable events arrived while the socket is still connected
    Success,
    /// The operation would block
    WouldBlock,
    /// Events arrived but the socket left the connected state
    Closed,
    /// The wait failed
    Failed,
    /// The deadline expired
    Timeout,
    /// The peer requested a shutdown
    ShutdownRequest,
}

/// Lock-free [`ConnectionStatus`] cell shared across threads.
#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) const fn new(status: ConnectionStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub(crate) fn load(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store `status`, except that `Error` is terminal and never overwritten.
    pub(crate) fn store(&self, status: ConnectionStatus) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (ConnectionStatus::from_u8(current) != ConnectionStatus::Error)
                    .then_some(status as u8)
            });
    }
}
