//! Stateful transport with open/close lifecycle.
//!
//! `MailTransport` wraps the [`Connector`] → [`Connection`] transition behind
//! a mutable API for callers that keep one long-lived transport per account.
//!
//! ## Example
//!
//! ```ignore
//! use mail_transport::{Config, Connector, Flags, MailTransport};
//!
//! let config = Config::new("imap.example.com", 993, Flags::ENCRYPT);
//! let mut transport = MailTransport::new(Connector::new(config));
//!
//! transport.open().await?;
//! let greeting = transport.read_line(true).await?;
//! transport.write_line("A1 LOGIN user secret", Some("A1 LOGIN user ****")).await?;
//! transport.close().await;
//! ```

use std::mem;

use tracing::debug;

use crate::connection::Connection;
use crate::connector::Connector;
use crate::{Error, Result};

/// Current state of the transport.
#[derive(Debug)]
enum State {
    /// No socket.
    Closed,
    /// Socket and buffers present.
    Open(Connection),
}

/// Line transport to a single mail server.
#[derive(Debug)]
pub struct MailTransport {
    connector: Connector,
    state: State,
}

impl MailTransport {
    /// Creates a closed transport.
    #[must_use]
    pub const fn new(connector: Connector) -> Self {
        Self {
            connector,
            state: State::Closed,
        }
    }

    /// Returns the connector.
    #[must_use]
    pub const fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Returns true if the transport upgrades to TLS.
    #[must_use]
    pub const fn encrypts(&self) -> bool {
        self.connector.config().encrypts()
    }

    /// Returns true if certificate verification is disabled.
    #[must_use]
    pub const fn trusts_all_certificates(&self) -> bool {
        self.connector.config().trusts_all_certificates()
    }

    /// Opens the transport.
    ///
    /// A connection that is already open is closed first. On failure the
    /// transport stays closed.
    ///
    /// # Errors
    ///
    /// See [`Connector::connect`].
    pub async fn open(&mut self) -> Result<()> {
        self.close().await;
        let connection = self.connector.connect().await?;
        self.state = State::Open(connection);
        Ok(())
    }

    /// Returns true if a connection is present and its socket is connected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        match &self.state {
            State::Open(connection) => connection.is_open(),
            State::Closed => false,
        }
    }

    /// Closes the transport.
    ///
    /// Never fails. Closing a transport that was never opened, or that is
    /// already closed, does nothing.
    pub async fn close(&mut self) {
        if let State::Open(connection) = mem::replace(&mut self.state, State::Closed) {
            connection.close().await;
        } else {
            debug!("close on a transport that is not open");
        }
    }

    /// Returns the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the transport is closed.
    pub fn connection_mut(&mut self) -> Result<&mut Connection> {
        match &mut self.state {
            State::Open(connection) => Ok(connection),
            State::Closed => Err(Error::NotConnected),
        }
    }

    /// Writes a CRLF-terminated line.
    ///
    /// `sensitive_replacement`, when given, is logged in place of `line`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the transport is closed, or the
    /// underlying I/O error.
    pub async fn write_line(
        &mut self,
        line: &str,
        sensitive_replacement: Option<&str>,
    ) -> Result<()> {
        self.connection_mut()?
            .write_line(line, sensitive_replacement)
            .await
            .map_err(Error::from)
    }

    /// Reads a line terminated by `\n` or `\r\n`, without the terminator.
    ///
    /// At end of stream the partial (possibly empty) line is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the transport is closed, or the
    /// underlying I/O error.
    pub async fn read_line(&mut self, loggable: bool) -> Result<String> {
        self.connection_mut()?
            .read_line(loggable)
            .await
            .map_err(Error::from)
    }

    /// Reads a line as raw bytes.
    ///
    /// # Errors
    ///
    /// Same as [`MailTransport::read_line`].
    pub async fn read_line_bytes(&mut self, loggable: bool) -> Result<Vec<u8>> {
        self.connection_mut()?
            .read_line_bytes(loggable)
            .await
            .map_err(Error::from)
    }
}

impl Clone for MailTransport {
    /// Returns a closed transport configured identically.
    fn clone(&self) -> Self {
        Self::new(self.connector.clone())
    }
}
