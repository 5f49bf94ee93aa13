//! Client-side error type.

use crate::protocol::{ErrorFrame, ErrorKind};
use crate::transport::CodecError;

/// Errors a worker can see when requesting a socket.
///
/// `Resolution` and `Bind` are broker-side failures forwarded over the
/// wire; their `Display` is the broker's message verbatim, so a worker
/// sees exactly what a local bind attempt would have printed. The rest
/// are failures of the channel itself.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{message}")]
    Resolution { message: String },

    #[error("{message}")]
    Bind { message: String },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(CodecError),

    #[error("broker closed the connection")]
    Disconnected,

    #[error("unexpected frame from broker")]
    UnexpectedFrame,
}

impl From<ErrorFrame> for ClientError {
    fn from(frame: ErrorFrame) -> Self {
        match frame.kind {
            ErrorKind::Resolution => ClientError::Resolution {
                message: frame.message,
            },
            ErrorKind::Bind => ClientError::Bind {
                message: frame.message,
            },
        }
    }
}

impl From<CodecError> for ClientError {
    fn from(e: CodecError) -> Self {
        match e {
            // EOF inside a frame means the broker went away
            CodecError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                ClientError::Disconnected
            }
            CodecError::Io(io) => ClientError::Transport(io),
            other => ClientError::Codec(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
