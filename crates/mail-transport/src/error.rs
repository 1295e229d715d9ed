//! Error types for the transport.

use std::io;

use thiserror::Error;

/// Errors that can occur while opening or using a transport.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The designated network failed to resolve the host.
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        /// Host that was being resolved.
        host: String,
        /// Resolver failure.
        #[source]
        source: io::Error,
    },

    /// The designated network resolved the host to no addresses.
    #[error("host name {host} cannot be resolved on designated network")]
    Unresolved {
        /// Host that was being resolved.
        host: String,
    },

    /// The socket factory could not produce a socket.
    #[error("cannot create socket: {0}")]
    SocketCreation(#[source] io::Error),

    /// Every candidate address failed; carries the last failure.
    #[error("cannot connect to {address} ({attempts} address(es) tried): {source}")]
    Connect {
        /// Last candidate that was tried.
        address: String,
        /// Number of candidates tried.
        attempts: usize,
        /// Failure of the last candidate.
        #[source]
        source: io::Error,
    },

    /// Operation needs an open transport.
    #[error("transport is not open")]
    NotConnected,

    /// TLS configuration or protocol error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// TLS session could not be used for verification.
    #[error("SSL error: {0}")]
    Ssl(String),

    /// The peer certificate is not valid for the expected host.
    #[error("certificate hostname not usable for server {host}: {principal}")]
    PeerUnverified {
        /// Host the transport was asked to reach.
        host: String,
        /// Peer identity as reported by the verifier.
        principal: String,
    },
}

/// Coarse error classification used by callers that map failures onto
/// account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or socket failure.
    Io,
    /// TLS session failure.
    Ssl,
    /// Certificate does not match the server.
    PeerUnverified,
}

impl Error {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_)
            | Self::Resolve { .. }
            | Self::Unresolved { .. }
            | Self::SocketCreation(_)
            | Self::Connect { .. }
            | Self::NotConnected => ErrorKind::Io,
            Self::Tls(_) | Self::InvalidDnsName(_) | Self::Ssl(_) => ErrorKind::Ssl,
            Self::PeerUnverified { .. } => ErrorKind::PeerUnverified,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
