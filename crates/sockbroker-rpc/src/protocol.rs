//! Broker wire protocol types.
//!
//! A connection carries a sequence of frames (see [`crate::transport`]).
//! The payload of every frame is JSON, and the JSON *shape* disambiguates
//! what it is: requests are arrays, forwarded errors are objects, and the
//! acknowledgement that precedes a descriptor transfer is `null`.

use serde::de::{Deserializer, Error as _};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Operation requested by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenOp {
    ListenTcp,
    ListenUdp,
}

impl std::fmt::Display for ListenOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenOp::ListenTcp => write!(f, "listen_tcp"),
            ListenOp::ListenUdp => write!(f, "listen_udp"),
        }
    }
}

/// One socket request.
///
/// Travels on the wire as the ordered array `[pid, op, bind, port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRequest {
    /// Process id of the requesting worker.
    pub pid: u32,
    pub op: ListenOp,
    /// Bind host as the worker spelled it: hostname, IPv4 or IPv6 literal.
    pub bind: String,
    pub port: u16,
}

impl Serialize for SocketRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.pid, self.op, &self.bind, self.port).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SocketRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (pid, op, bind, port) = <(u32, ListenOp, String, u16)>::deserialize(deserializer)?;
        if bind.is_empty() {
            return Err(D::Error::custom("empty bind host"));
        }
        Ok(Self {
            pid,
            op,
            bind,
            port,
        })
    }
}

/// Kind of a forwardable broker-side failure.
///
/// Transport failures are deliberately absent: they have no valid peer
/// framing left to travel over and surface locally on whichever side
/// detected them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Resolution,
    Bind,
}

/// A broker-side error serialized back to the requesting worker.
///
/// The message is exactly what the broker's own error produced, so a
/// worker sees the same text it would have seen binding locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorFrame {
    #[must_use]
    pub fn resolution(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Resolution,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bind(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Bind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorFrame {}

/// Any message that can appear on a broker connection.
///
/// Untagged: a JSON array decodes as a request, an object as a forwarded
/// error, and `null` as the pre-transfer acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Request(SocketRequest),
    Error(ErrorFrame),
    Ack,
}

impl Frame {
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, Frame::Request(_))
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    #[must_use]
    pub fn is_ack(&self) -> bool {
        matches!(self, Frame::Ack)
    }
}
