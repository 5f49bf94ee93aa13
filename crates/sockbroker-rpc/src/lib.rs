//! Wire protocol and worker-side client for the sockbroker socket broker.
//!
//! A privileged broker process binds listening sockets once and hands
//! already-bound duplicates to worker processes over a Unix domain
//! socket. This crate provides everything both ends share:
//!
//! - [`protocol`]: request, error, and acknowledgement frame types
//! - [`transport`]: 4-byte big-endian length-prefixed frame codec
//! - [`fdpass`]: `SCM_RIGHTS` descriptor transfer (Unix)
//! - [`client`]: the worker-side client
//! - [`error`]: client error type and `Result` alias
//!
//! # Example
//!
//! ```no_run
//! use sockbroker_rpc::Client;
//!
//! # async fn example() -> sockbroker_rpc::Result<()> {
//! let client = Client::new("/run/user/1000/sockbroker.sock");
//!
//! // Either a working listener, indistinguishable from one this process
//! // bound itself, or the broker's own bind error.
//! let listener = client.listen_tcp("127.0.0.1", 8080).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(unix)]
pub mod client;
pub mod error;
#[cfg(unix)]
pub mod fdpass;
pub mod protocol;
pub mod transport;

// Re-export main client types
#[cfg(unix)]
pub use client::{Client, Connection, default_socket_path};

// Re-export error types
pub use error::{ClientError, Result};

// Re-export protocol types
pub use protocol::{ErrorFrame, ErrorKind, Frame, ListenOp, SocketRequest};

// Re-export transport types
pub use transport::{CodecError, FrameCodec, read_frame, write_frame};
