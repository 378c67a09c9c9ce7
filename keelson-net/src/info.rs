//! Host resolution and connection descriptors.

use crate::error::{NetError, NetResult};
use crate::proto::Protocol;
use std::net::{SocketAddr, ToSocketAddrs};

/// Default maximum transmission unit assumed until the socket reports one.
pub const DEFAULT_MTU: u16 = 1500;

/// Resolved connection descriptor. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    addr: SocketAddr,
    ip: String,
    port: u16,
    mtu: u16,
}

impl ConnInfo {
    /// Resolve `host` with the OS resolver, restricted to `protocol`.
    ///
    /// The first address of the requested family is used; its IP is kept in
    /// string form for diagnostics. Fails with [`NetError::Resolution`] when
    /// the resolver returns no usable address. Never panics.
    pub fn from_host(host: &str, port: u16, protocol: Protocol) -> NetResult<Self> {
        let candidates = (host, port).to_socket_addrs().map_err(|e| {
            NetError::resolution(format!("cannot resolve {host}:{port}: {e}"))
        })?;

        let addr = candidates
            .into_iter()
            .find(|addr| match protocol {
                Protocol::IPv4 => addr.is_ipv4(),
                Protocol::IPv6 => addr.is_ipv6(),
            })
            .ok_or_else(|| {
                NetError::resolution(format!("no {protocol} address for {host}:{port}"))
            })?;

        Ok(Self::from_addr(addr))
    }

    /// Build a descriptor from an already-resolved address.
    #[must_use]
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            addr,
            ip: addr.ip().to_string(),
            port: addr.port(),
            mtu: DEFAULT_MTU,
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn ip(&self) -> &str {
        &self.ip
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub const fn mtu(&self) -> u16 {
        self.mtu
    }
}

impl From<SocketAddr> for ConnInfo {
    fn from(addr: SocketAddr) -> Self {
        Self::from_addr(addr)
    }
}
