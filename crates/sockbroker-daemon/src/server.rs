//! Broker core: the socket cache and the channel accept loop.
//!
//! The broker binds each distinct (protocol, resolved address, port)
//! exactly once for its whole lifetime and serves duplicates of the
//! cached socket to every peer that asks. One mutex guards both caches;
//! it is held across the whole check-create-insert sequence and never
//! across channel I/O.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sockbroker_rpc::client::Client;
use sockbroker_rpc::fdpass;
use sockbroker_rpc::protocol::{ErrorFrame, Frame, ListenOp, SocketRequest};
use sockbroker_rpc::transport::FrameCodec;

use crate::error::{BrokerError, Result};
use crate::resolver::resolve_bind_key;

/// Both caches, key → owned socket. Entries are never removed; the
/// broker keeps every socket open so duplicated handles stay valid.
#[derive(Debug, Default)]
struct SocketCache {
    tcp: HashMap<String, std::net::TcpListener>,
    udp: HashMap<String, std::net::UdpSocket>,
}

/// A running broker: a Unix socket channel plus the socket cache.
///
/// Workers connect through [`Client`] handles and receive duplicated
/// descriptors of cached sockets. Dropping the `Broker` (or calling
/// [`Broker::close`]) stops the accept loop; in-flight connections run
/// to completion on their own tasks.
#[derive(Debug)]
pub struct Broker {
    path: PathBuf,
    cache: Arc<Mutex<SocketCache>>,
    shutdown: CancellationToken,
}

impl Broker {
    /// Bind the broker channel at `path` and start accepting peers.
    ///
    /// Returns once the channel is ready; the accept loop runs on a
    /// background task. A stale socket file left by a dead broker is
    /// removed first.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Channel` if another broker answers on
    /// `path` or the channel cannot be bound.
    pub async fn start(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        cleanup_stale_socket(&path).await?;

        let listener = UnixListener::bind(&path).map_err(BrokerError::Channel)?;
        info!("broker listening on {}", path.display());

        let cache = Arc::new(Mutex::new(SocketCache::default()));
        let shutdown = CancellationToken::new();

        let loop_cache = cache.clone();
        let loop_token = shutdown.clone();
        tokio::spawn(async move {
            accept_loop(listener, loop_cache, loop_token).await;
        });

        Ok(Self {
            path,
            cache,
            shutdown,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A worker-side handle for this broker's channel. No I/O cost.
    #[must_use]
    pub fn client(&self) -> Client {
        Client::new(&self.path)
    }

    /// Stop accepting new connections and remove the socket file.
    ///
    /// In-flight connections finish independently. Cached sockets are
    /// not closed; handles already duplicated to workers stay valid.
    pub fn close(&self) {
        self.shutdown.cancel();
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("could not remove socket file {}: {}", self.path.display(), e);
        }
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        info!(
            tcp = cache.tcp.len(),
            udp = cache.udp.len(),
            "broker closed"
        );
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn cleanup_stale_socket(path: &Path) -> Result<()> {
    if path.exists() {
        if UnixStream::connect(path).await.is_ok() {
            return Err(BrokerError::Channel(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "another broker is already listening",
            )));
        }
        info!("removing stale socket at {}", path.display());
        std::fs::remove_file(path).map_err(BrokerError::Channel)?;
    }
    Ok(())
}

async fn accept_loop(
    listener: UnixListener,
    cache: Arc<Mutex<SocketCache>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("accept loop stopped");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    debug!("accepted connection");
                    let cache = cache.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, cache).await {
                            // The peer is gone; nothing to forward to.
                            debug!("connection ended: {e}");
                        }
                    });
                }
                Err(e) => error!("accept error: {e}"),
            }
        }
    }
}

/// Serve one peer until it disconnects.
///
/// Each request gets exactly one response: an ack frame followed by the
/// descriptor transfer, or an error frame. A failed request does not
/// terminate the connection.
async fn handle_connection(stream: UnixStream, cache: Arc<Mutex<SocketCache>>) -> Result<()> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    while let Some(result) = framed.next().await {
        let request = match result? {
            Frame::Request(request) => request,
            other => {
                warn!("peer sent a non-request frame: {other:?}");
                break;
            }
        };

        debug!(
            pid = request.pid,
            op = %request.op,
            bind = %request.bind,
            port = request.port,
            "request"
        );

        match serve_request(&request, &cache).await {
            Ok(fd) => {
                framed.send(Frame::Ack).await?;
                fdpass::send_fd(framed.get_ref(), fd)
                    .await
                    .map_err(BrokerError::Channel)?;
            }
            Err(e) => {
                warn!("request failed: {e}");
                framed.send(Frame::Error(ErrorFrame::from(&e))).await?;
            }
        }
    }

    debug!("peer disconnected");
    Ok(())
}

/// Look up or create the socket for one request and return its raw fd.
///
/// The fd stays valid for the life of the cache: entries are never
/// removed, so handing the raw value past the lock is safe.
async fn serve_request(request: &SocketRequest, cache: &Mutex<SocketCache>) -> Result<RawFd> {
    // Resolution does not touch the caches; keep it outside the lock.
    let (key, ip) = resolve_bind_key(&request.bind, request.port).await?;
    let addr = SocketAddr::new(ip, request.port);

    // Held across the whole check-create-insert: concurrent requests for
    // the same new key must not race to a duplicate bind.
    let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);

    match request.op {
        ListenOp::ListenTcp => {
            if let Some(sock) = cache.tcp.get(&key) {
                debug!(%key, "tcp cache hit");
                return Ok(sock.as_raw_fd());
            }
            let sock = listen_tcp_new(addr)?;
            let fd = sock.as_raw_fd();
            info!(%key, "bound new tcp listener");
            cache.tcp.insert(key, sock);
            Ok(fd)
        }
        ListenOp::ListenUdp => {
            if let Some(sock) = cache.udp.get(&key) {
                debug!(%key, "udp cache hit");
                return Ok(sock.as_raw_fd());
            }
            let sock = listen_udp_new(addr)?;
            let fd = sock.as_raw_fd();
            info!(%key, "bound new udp socket");
            cache.udp.insert(key, sock);
            Ok(fd)
        }
    }
}

fn listen_tcp_new(addr: SocketAddr) -> Result<std::net::TcpListener> {
    std::net::TcpListener::bind(addr).map_err(|source| BrokerError::Bind { addr, source })
}

fn listen_udp_new(addr: SocketAddr) -> Result<std::net::UdpSocket> {
    std::net::UdpSocket::bind(addr).map_err(|source| BrokerError::Bind { addr, source })
}
