//! An open transport.

use std::io;
use std::net::SocketAddr;

use tokio::io::BufStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::codec::LineStream;
use crate::connector::Connector;
use crate::stream::MailStream;

/// A connected (and possibly encrypted) line stream.
///
/// The buffered reader, the buffered writer and the socket live and die
/// together: a `Connection` either has all three or does not exist.
#[derive(Debug)]
pub struct Connection {
    stream: LineStream<MailStream>,
    connector: Connector,
}

impl Connection {
    pub(crate) fn new(stream: MailStream, connector: Connector) -> Self {
        let config = connector.config();
        let mut stream =
            LineStream::with_capacity(config.read_buffer_size, config.write_buffer_size, stream);
        stream.set_read_timeout(Some(config.read_timeout));
        stream.set_max_line_length(config.max_line_length);
        Self { stream, connector }
    }

    /// Returns true while the socket is connected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.get_ref().is_connected()
    }

    /// Returns true if the connection is encrypted.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.stream.get_ref().is_tls()
    }

    /// Returns the address actually connected to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is no longer connected.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().peer_addr()
    }

    /// Returns the connector this connection was opened with.
    #[must_use]
    pub const fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Writes a CRLF-terminated line and flushes it.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub async fn write_line(
        &mut self,
        line: &str,
        sensitive_replacement: Option<&str>,
    ) -> io::Result<()> {
        self.stream.write_line(line, sensitive_replacement).await
    }

    /// Reads a line terminated by `\n` or `\r\n`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error or a read timeout.
    pub async fn read_line(&mut self, loggable: bool) -> io::Result<String> {
        self.stream.read_line(loggable).await
    }

    /// Reads a line as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error or a read timeout.
    pub async fn read_line_bytes(&mut self, loggable: bool) -> io::Result<Vec<u8>> {
        self.stream.read_line_bytes(loggable).await
    }

    /// Gets the buffered byte stream, for protocol code that reads literals
    /// or writes raw data between lines.
    pub const fn stream_mut(&mut self) -> &mut BufStream<MailStream> {
        self.stream.buffered_mut()
    }

    /// Closes the connection.
    ///
    /// Pending output is flushed and the write side shut down on a best
    /// effort basis, for at most the configured read timeout; failures are
    /// ignored. The socket is released when this returns.
    pub async fn close(mut self) {
        let limit = self.connector.config().read_timeout;
        match timeout(limit, self.stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => trace!(error = %err, "ignoring error while closing"),
            Err(_) => trace!(?limit, "shutdown timed out, dropping socket"),
        }
        debug!("connection closed");
    }
}
