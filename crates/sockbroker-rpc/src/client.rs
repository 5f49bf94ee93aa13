//! Worker-side client for the socket broker.
//!
//! A [`Client`] is nothing but a channel address; constructing one costs
//! no I/O. Each `listen_tcp`/`listen_udp` call opens a fresh connection,
//! sends one request, waits for the response, and closes the connection
//! on every exit path. For workers that want several sockets over one
//! connection, [`Client::connect`] yields a reusable [`Connection`].

use std::path::{Path, PathBuf};

use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::fdpass;
use crate::protocol::{Frame, ListenOp, SocketRequest};
use crate::transport::{read_frame, write_frame};

fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(|_| std::env::temp_dir(), PathBuf::from)
}

/// Default socket path for the broker channel.
///
/// On Linux, prefers `$XDG_RUNTIME_DIR` for proper runtime file handling.
/// Falls back to the system temp directory.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    runtime_dir().join("sockbroker.sock")
}

/// Handle to a broker's channel. Cheap to create and clone; stateless
/// apart from the path.
#[derive(Debug, Clone)]
pub struct Client {
    path: PathBuf,
}

impl Client {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection that can issue many sequential requests.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the broker channel cannot be
    /// reached.
    pub async fn connect(&self) -> Result<Connection> {
        let stream = UnixStream::connect(&self.path).await?;
        Ok(Connection { stream })
    }

    /// Request a listening TCP socket for `(bind, port)` from the broker.
    ///
    /// The returned listener is already bound and listening; workers that
    /// ask for the same address share one kernel accept queue.
    ///
    /// # Errors
    ///
    /// Forwarded broker failures surface as `ClientError::Resolution` or
    /// `ClientError::Bind`; channel failures as `ClientError::Transport`.
    pub async fn listen_tcp(&self, bind: &str, port: u16) -> Result<std::net::TcpListener> {
        let mut conn = self.connect().await?;
        conn.listen_tcp(bind, port).await
    }

    /// Request a bound UDP socket for `(bind, port)` from the broker.
    ///
    /// # Errors
    ///
    /// Same as [`Client::listen_tcp`].
    pub async fn listen_udp(&self, bind: &str, port: u16) -> Result<std::net::UdpSocket> {
        let mut conn = self.connect().await?;
        conn.listen_udp(bind, port).await
    }
}

/// One open channel to the broker.
///
/// Requests are strictly sequential: send, wait for the response, then
/// the next request. Dropping the connection closes the channel.
pub struct Connection {
    stream: UnixStream,
}

impl Connection {
    /// Request a listening TCP socket over this connection.
    ///
    /// # Errors
    ///
    /// Same as [`Client::listen_tcp`].
    pub async fn listen_tcp(&mut self, bind: &str, port: u16) -> Result<std::net::TcpListener> {
        self.request(ListenOp::ListenTcp, bind, port).await?;
        let listener = fdpass::recv_tcp_listener(&self.stream).await?;
        debug!(bind, port, "received tcp listener");
        Ok(listener)
    }

    /// Request a bound UDP socket over this connection.
    ///
    /// # Errors
    ///
    /// Same as [`Client::listen_tcp`].
    pub async fn listen_udp(&mut self, bind: &str, port: u16) -> Result<std::net::UdpSocket> {
        self.request(ListenOp::ListenUdp, bind, port).await?;
        let socket = fdpass::recv_udp_socket(&self.stream).await?;
        debug!(bind, port, "received udp socket");
        Ok(socket)
    }

    /// Send one request and consume the response frame up to (but not
    /// including) the descriptor transfer.
    async fn request(&mut self, op: ListenOp, bind: &str, port: u16) -> Result<()> {
        let request = SocketRequest {
            pid: std::process::id(),
            op,
            bind: bind.to_string(),
            port,
        };
        write_frame(&mut self.stream, &Frame::Request(request)).await?;

        match read_frame(&mut self.stream).await? {
            Frame::Ack => Ok(()),
            Frame::Error(err) => Err(err.into()),
            Frame::Request(_) => Err(ClientError::UnexpectedFrame),
        }
    }
}
