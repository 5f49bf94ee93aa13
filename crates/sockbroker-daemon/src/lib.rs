//! Broker library: socket cache, bind resolution, and the channel server.
//!
//! A parent process starts a [`Broker`] on a Unix socket path and hands
//! that path to its workers. Each worker asks for a listening socket by
//! (host, port); the broker binds it once, caches it, and transfers a
//! duplicated descriptor, so any number of workers share one kernel
//! accept queue without ever binding themselves.

pub mod error;
pub mod resolver;
pub mod server;

pub use error::{BrokerError, Result};
pub use resolver::resolve_bind_key;
pub use server::Broker;
