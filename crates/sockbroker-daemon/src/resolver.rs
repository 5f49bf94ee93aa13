//! Bind-address resolution and cache-key derivation.
//!
//! Cache keys are built from the *resolved* numeric address, never the
//! spelling the worker used, so a hostname and a literal that name the
//! same address always collide to the same cached socket.

use std::io;
use std::net::IpAddr;

use tokio::net::lookup_host;

use crate::error::{BrokerError, Result};

/// Resolve `bind` and derive the canonical cache key for `(bind, port)`.
///
/// Key format: `"a.b.c.d:port"` for IPv4, `"[v6]:port"` for IPv6 with the
/// address in Rust's canonical textual form. The first resolved address
/// wins. This performs no socket operations and must be called outside
/// the cache lock.
///
/// # Errors
///
/// Returns `BrokerError::Resolution` if `bind` does not resolve.
pub async fn resolve_bind_key(bind: &str, port: u16) -> Result<(String, IpAddr)> {
    let mut addrs = lookup_host((bind, port))
        .await
        .map_err(|source| BrokerError::Resolution {
            host: bind.to_string(),
            source,
        })?;

    let addr = addrs.next().ok_or_else(|| BrokerError::Resolution {
        host: bind.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
    })?;

    let ip = addr.ip();
    let key = match ip {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    };

    Ok((key, ip))
}
