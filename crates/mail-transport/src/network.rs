//! Network selection and socket creation capabilities.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tokio::net::{TcpSocket, lookup_host};

/// A routing domain the transport can be pinned to.
///
/// When a network is designated, host resolution and socket creation both
/// go through it instead of the system defaults.
#[async_trait]
pub trait Network: Send + Sync + fmt::Debug {
    /// Resolves `host` to every address this network reports.
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;

    /// Creates an unconnected socket suitable for reaching `addr`.
    fn create_socket(&self, addr: &SocketAddr) -> io::Result<TcpSocket>;
}

/// Replaces socket creation entirely.
///
/// Installed through [`Connector::with_socket_creator`](crate::Connector::with_socket_creator),
/// it takes precedence over both the default factory and a designated
/// network's factory.
pub trait SocketCreator: Send + Sync + fmt::Debug {
    /// Creates an unconnected socket suitable for reaching `addr`.
    fn create_socket(&self, addr: &SocketAddr) -> io::Result<TcpSocket>;
}

/// Creates a default unconnected socket of the address family of `addr`.
pub fn unbound_socket(addr: &SocketAddr) -> io::Result<TcpSocket> {
    if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

/// Network selected by a local interface address.
///
/// Sockets are bound to `local_address` before connecting, and resolution
/// only keeps addresses reachable from that address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundNetwork {
    local_address: IpAddr,
}

impl BoundNetwork {
    /// Creates a network bound to the given local address.
    #[must_use]
    pub const fn new(local_address: IpAddr) -> Self {
        Self { local_address }
    }

    /// Returns the local address sockets are bound to.
    #[must_use]
    pub const fn local_address(&self) -> IpAddr {
        self.local_address
    }
}

#[async_trait]
impl Network for BoundNetwork {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let ipv4 = self.local_address.is_ipv4();
        let addresses = lookup_host((host, 0))
            .await?
            .map(|addr| addr.ip())
            .filter(|ip| ip.is_ipv4() == ipv4)
            .fold(Vec::new(), |mut acc, ip| {
                if !acc.contains(&ip) {
                    acc.push(ip);
                }
                acc
            });
        Ok(addresses)
    }

    fn create_socket(&self, addr: &SocketAddr) -> io::Result<TcpSocket> {
        if addr.is_ipv4() != self.local_address.is_ipv4() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{addr} is not reachable from {}", self.local_address),
            ));
        }
        let socket = unbound_socket(addr)?;
        socket.bind(SocketAddr::new(self.local_address, 0))?;
        Ok(socket)
    }
}
