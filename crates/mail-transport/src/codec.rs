//! Line framing over a buffered byte stream.
//!
//! Outgoing lines are terminated with CRLF. Incoming lines end at the first
//! LF; every CR is dropped wherever it appears, so both `\n` and `\r\n`
//! terminators are accepted. A line longer than the configured maximum is
//! rejected rather than buffered without bound.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::debug;

use crate::config::{MAX_LINE_LENGTH, READ_BUFFER_SIZE, WRITE_BUFFER_SIZE};

/// Buffered line reader and writer over a single byte stream.
#[derive(Debug)]
pub struct LineStream<S> {
    inner: BufStream<S>,
    read_timeout: Option<Duration>,
    max_line_length: usize,
}

impl<S> LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a line stream with the default buffer sizes and no read
    /// timeout.
    pub fn new(stream: S) -> Self {
        Self::with_capacity(READ_BUFFER_SIZE, WRITE_BUFFER_SIZE, stream)
    }

    /// Creates a line stream with the given reader and writer capacities.
    pub fn with_capacity(read_capacity: usize, write_capacity: usize, stream: S) -> Self {
        Self {
            inner: BufStream::with_capacity(read_capacity, write_capacity, stream),
            read_timeout: None,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    /// Bounds how long a read may wait for the peer.
    pub const fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Returns the read idle timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Sets the longest line, terminator excluded, a read will accept.
    pub const fn set_max_line_length(&mut self, max: usize) {
        self.max_line_length = max;
    }

    /// Returns the longest line a read will accept.
    #[must_use]
    pub const fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Writes `line` followed by CRLF and flushes.
    ///
    /// When `sensitive_replacement` is given, it is logged instead of `line`.
    /// The bytes written are always those of `line`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the write or flush fails.
    pub async fn write_line(
        &mut self,
        line: &str,
        sensitive_replacement: Option<&str>,
    ) -> io::Result<()> {
        debug!(">>> {}", sensitive_replacement.unwrap_or(line));

        let mut buf = BytesMut::with_capacity(line.len() + 2);
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\r\n");

        self.inner.write_all(&buf).await?;
        self.inner.flush().await
    }

    /// Reads one line as raw bytes, without its terminator.
    ///
    /// Reading stops at the first LF or at end of stream. Every CR byte is
    /// discarded. At end of stream the bytes read so far are returned, which
    /// may be empty; callers that need to tell an empty line from a closed
    /// connection must check that themselves.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, [`io::ErrorKind::TimedOut`] when
    /// the peer stays silent past the read timeout, or
    /// [`io::ErrorKind::InvalidData`] when the line exceeds the maximum
    /// length.
    pub async fn read_line_bytes(&mut self, loggable: bool) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut terminated = false;

        while !terminated {
            let available = self.fill_buf().await?;
            if available.is_empty() {
                break;
            }

            let consumed = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    terminated = true;
                    pos + 1
                }
                None => available.len(),
            };
            line.extend(
                available[..consumed]
                    .iter()
                    .copied()
                    .filter(|&b| b != b'\r' && b != b'\n'),
            );
            self.inner.consume(consumed);

            if line.len() > self.max_line_length {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line too long (over {} bytes)", self.max_line_length),
                ));
            }
        }

        if !terminated {
            debug!("End of stream reached while trying to read line.");
        }
        if loggable {
            debug!("<<< {}", String::from_utf8_lossy(&line));
        }
        Ok(line)
    }

    /// Reads one line as text, without its terminator.
    ///
    /// Invalid UTF-8 is replaced. See [`LineStream::read_line_bytes`] for
    /// the framing rules.
    ///
    /// # Errors
    ///
    /// Same as [`LineStream::read_line_bytes`].
    pub async fn read_line(&mut self, loggable: bool) -> io::Result<String> {
        let line = self.read_line_bytes(loggable).await?;
        Ok(match String::from_utf8(line) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        })
    }

    /// Flushes pending output and shuts down the write side.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// Gets a mutable reference to the underlying stream.
    ///
    /// Note: bytes written here bypass the write buffer, and bytes read
    /// here bypass the read buffer.
    pub fn get_mut(&mut self) -> &mut S {
        self.inner.get_mut()
    }

    /// Gets the buffered stream used for line framing.
    pub const fn buffered_mut(&mut self) -> &mut BufStream<S> {
        &mut self.inner
    }

    /// Consumes the line stream and returns the inner stream.
    ///
    /// Note: Any buffered data will be lost.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }

    async fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.fill_buf())
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data received for {limit:?}"),
                    )
                })?,
            None => self.inner.fill_buf().await,
        }
    }
}
