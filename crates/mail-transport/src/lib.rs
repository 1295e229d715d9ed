//! # mail-transport
//!
//! A line-oriented TCP/TLS transport for mail protocol clients such as IMAP.
//!
//! ## Features
//!
//! - **Address failover**: every address a designated network reports for
//!   the host is tried in order; only the last failure is surfaced
//! - **In-place TLS upgrade**: the connected socket is wrapped with rustls,
//!   never re-resolved or reconnected
//! - **Explicit hostname verification**, or an opt-in trust-all mode
//! - **Line codec**: CRLF on write; `\n` or `\r\n` on read, with every `\r`
//!   dropped
//! - **Infallible teardown**: closing never reports an error
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mail_transport::{Config, Connector, Flags, MailTransport};
//!
//! #[tokio::main]
//! async fn main() -> mail_transport::Result<()> {
//!     let config = Config::new("imap.example.com", 993, Flags::ENCRYPT);
//!     let connector = Connector::new(config).with_status_listener(Arc::new(MyListener));
//!     let mut transport = MailTransport::new(connector);
//!
//!     transport.open().await?;
//!     let greeting = transport.read_line(true).await?;
//!     transport.write_line("A1 LOGOUT", None).await?;
//!     transport.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! ┌─────────────┐                  ┌──────────────┐
//! │  Connector  │ ─── connect() ─→ │  Connection  │ ─── close() ───→ (dropped)
//! └─────────────┘                  └──────────────┘
//! ```
//!
//! [`MailTransport`] keeps either nothing or one [`Connection`] and exposes
//! `open`/`close`/`is_open` on top of that transition.
//!
//! ## Modules
//!
//! - [`codec`]: line framing over a buffered stream
//! - [`network`]: network selection and socket creation capabilities
//! - [`status`]: data channel state notifications
//! - [`tls`]: TLS connector and peer verification

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod codec;
mod config;
mod connection;
mod connector;
mod error;
pub mod network;
pub mod status;
mod stream;
pub mod tls;
mod transport;

pub use codec::LineStream;
pub use config::{
    Config, ConfigBuilder, Flags, MAX_LINE_LENGTH, READ_BUFFER_SIZE, SOCKET_CONNECT_TIMEOUT,
    SOCKET_READ_TIMEOUT, WRITE_BUFFER_SIZE,
};
pub use connection::Connection;
pub use connector::Connector;
pub use error::{Error, ErrorKind, Result};
pub use network::{BoundNetwork, Network, SocketCreator};
pub use status::{DataChannelState, NoopStatusListener, StatusListener};
pub use stream::MailStream;
pub use transport::MailTransport;
