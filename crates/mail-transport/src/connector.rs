//! Connection establishment: resolution, failover and TLS upgrade.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpSocket, lookup_host};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::{Config, Flags};
use crate::connection::Connection;
use crate::network::{Network, SocketCreator, unbound_socket};
use crate::status::{DataChannelState, NoopStatusListener, StatusListener};
use crate::stream::MailStream;
use crate::tls::{create_tls_connector, verify_peer};
use crate::{Error, Result};

/// One address to try while opening.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Candidate {
    /// Resolved by the system resolver when it is tried.
    Unresolved { host: String, port: u16 },
    /// Address reported by the designated network.
    Resolved(SocketAddr),
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved { host, port } => write!(f, "{host}:{port}"),
            Self::Resolved(addr) => write!(f, "{addr}"),
        }
    }
}

/// Opens connections for one configured server.
///
/// A connector holds configuration and collaborators only; it owns no
/// socket. Cloning it is a configuration copy.
#[derive(Debug, Clone)]
pub struct Connector {
    config: Config,
    network: Option<Arc<dyn Network>>,
    listener: Arc<dyn StatusListener>,
    socket_creator: Option<Arc<dyn SocketCreator>>,
}

impl Connector {
    /// Creates a connector using the default network and no listener.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            network: None,
            listener: Arc::new(NoopStatusListener),
            socket_creator: None,
        }
    }

    /// Pins resolution and socket creation to `network`.
    #[must_use]
    pub fn with_network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    /// Sets the listener told about connection failures.
    #[must_use]
    pub fn with_status_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Replaces socket creation.
    #[must_use]
    pub fn with_socket_creator(mut self, creator: Arc<dyn SocketCreator>) -> Self {
        self.socket_creator = Some(creator);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the server hostname.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Returns the server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.config.port
    }

    /// Returns the capability flags.
    #[must_use]
    pub const fn flags(&self) -> Flags {
        self.config.flags
    }

    /// Opens a connection to the configured server.
    ///
    /// Candidate addresses are tried in order until one connects (and, with
    /// [`Flags::ENCRYPT`], completes its TLS upgrade). Only the last
    /// candidate's failure is reported.
    ///
    /// # Errors
    ///
    /// - [`Error::Resolve`] / [`Error::Unresolved`] if the designated network
    ///   cannot resolve the host;
    /// - [`Error::SocketCreation`] if no socket can be created;
    /// - [`Error::Connect`] if every candidate fails;
    /// - [`Error::Ssl`] / [`Error::PeerUnverified`] if the TLS peer cannot be
    ///   verified.
    ///
    /// The status listener is notified before resolution, connect and
    /// verification errors are returned.
    pub async fn connect(&self) -> Result<Connection> {
        debug!("*** IMAP open {}:{}", self.config.host, self.config.port);

        let mut candidates = self.candidates().await?;
        let mut attempts = 0;

        while let Some(candidate) = candidates.pop_front() {
            attempts += 1;
            match self.attempt(&candidate).await {
                Ok(stream) => return Ok(Connection::new(stream, self.clone())),
                Err(Error::Io(err)) => {
                    debug!(%candidate, error = %err, "connection attempt failed");
                    if candidates.is_empty() {
                        warn!(attempts, "no more addresses to try");
                        self.notify(DataChannelState::ServerConnectionError);
                        return Err(Error::Connect {
                            address: candidate.to_string(),
                            attempts,
                            source: err,
                        });
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::Unresolved {
            host: self.config.host.clone(),
        })
    }

    /// Builds the ordered candidate list.
    async fn candidates(&self) -> Result<VecDeque<Candidate>> {
        let host = &self.config.host;
        let port = self.config.port;

        let Some(network) = &self.network else {
            return Ok(VecDeque::from([Candidate::Unresolved {
                host: host.clone(),
                port,
            }]));
        };

        let addresses = match network.resolve(host).await {
            Ok(addresses) => addresses,
            Err(err) => {
                debug!(host, error = %err, "resolution failed");
                self.notify(DataChannelState::ServerConnectionError);
                return Err(Error::Resolve {
                    host: host.clone(),
                    source: err,
                });
            }
        };

        if addresses.is_empty() {
            debug!(host, "no addresses on designated network");
            self.notify(DataChannelState::ServerConnectionError);
            return Err(Error::Unresolved { host: host.clone() });
        }

        Ok(addresses
            .into_iter()
            .map(|ip| Candidate::Resolved(SocketAddr::new(ip, port)))
            .collect())
    }

    /// Connects one candidate and performs the upgrade if configured.
    ///
    /// `Error::Io` marks a failure that lets the next candidate be tried.
    async fn attempt(&self, candidate: &Candidate) -> Result<MailStream> {
        let address = match candidate {
            Candidate::Resolved(addr) => *addr,
            Candidate::Unresolved { host, port } => {
                lookup_host((host.as_str(), *port)).await?.next().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no address for {host}"),
                    )
                })?
            }
        };

        let socket = self.create_socket(&address)?;
        let tcp = timeout(self.config.connect_timeout, socket.connect(address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "connect to {address} timed out after {:?}",
                        self.config.connect_timeout
                    ),
                )
            })??;
        let stream = MailStream::plain(tcp);

        if !self.config.encrypts() {
            return Ok(stream);
        }

        debug!("open: converting to TLS");
        let connector = create_tls_connector(&self.config)?;
        let stream = stream.upgrade_to_tls(&connector, &self.config.host).await?;

        if self.config.trusts_all_certificates() {
            trace!("skipping hostname verification");
        } else if let MailStream::Tls(tls) = &stream {
            verify_peer(
                tls.get_ref().1.peer_certificates(),
                &self.config.host,
                self.listener.as_ref(),
            )?;
        }

        Ok(stream)
    }

    /// Creates the socket for one candidate.
    fn create_socket(&self, address: &SocketAddr) -> Result<TcpSocket> {
        let created = if let Some(creator) = &self.socket_creator {
            creator.create_socket(address)
        } else if let Some(network) = &self.network {
            trace!("creating socket on designated network");
            network.create_socket(address)
        } else {
            trace!("creating socket on default network");
            unbound_socket(address)
        };

        created.map_err(|err| {
            debug!(error = %err, "socket creation failed");
            Error::SocketCreation(err)
        })
    }

    fn notify(&self, state: DataChannelState) {
        self.listener.set_data_channel_state(state);
    }
}
