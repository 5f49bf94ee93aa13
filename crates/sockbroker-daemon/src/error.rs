//! Error types for the broker daemon.

use std::io;
use std::net::SocketAddr;

use sockbroker_rpc::protocol::ErrorFrame;
use sockbroker_rpc::transport::CodecError;

/// Errors that can occur inside the broker
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Bind host did not resolve to an address
    #[error("failed to resolve bind host {host:?}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Resolved address/port could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The broker channel itself failed (listener setup, descriptor
    /// transfer, peer connection)
    #[error("channel error: {0}")]
    Channel(#[from] io::Error),

    /// Framing failure on a peer connection
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl BrokerError {
    /// Whether this error can be serialized back to the requesting peer.
    /// Channel and codec failures have no valid peer framing left.
    #[must_use]
    pub fn is_forwardable(&self) -> bool {
        matches!(
            self,
            BrokerError::Resolution { .. } | BrokerError::Bind { .. }
        )
    }
}

impl From<&BrokerError> for ErrorFrame {
    fn from(err: &BrokerError) -> Self {
        match err {
            BrokerError::Resolution { .. } => ErrorFrame::resolution(err.to_string()),
            _ => ErrorFrame::bind(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
