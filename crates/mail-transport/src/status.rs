//! Data channel state notifications.
//!
//! The transport reports connection health to the wider account so that
//! voicemail status can reflect the most recent failure before the caller
//! sees the error itself.

use std::fmt;

/// Failure conditions reported to a [`StatusListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataChannelState {
    /// The server could not be resolved or reached.
    ServerConnectionError,
    /// The TLS session could not be verified.
    CommunicationError,
}

impl fmt::Display for DataChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerConnectionError => f.write_str("server connection error"),
            Self::CommunicationError => f.write_str("communication error"),
        }
    }
}

/// Receives data channel state changes.
pub trait StatusListener: Send + Sync + fmt::Debug {
    /// Called once per reported failure, before the error is returned.
    fn set_data_channel_state(&self, state: DataChannelState);
}

/// Listener that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatusListener;

impl StatusListener for NoopStatusListener {
    fn set_data_channel_state(&self, _state: DataChannelState) {}
}
