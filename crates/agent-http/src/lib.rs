//! An asynchronous HTTP/1.x engine: client-side connection lifecycle (dial,
//! tunnel, TLS, send, receive, pool) and a server-side response writer,
//! built around a single [`transport::Transport`] abstraction so everything
//! above it is agnostic to plain TCP versus TLS.
//!
//! DNS resolution, raw TCP I/O, and HTTP header *parsing rules* themselves
//! are treated as opaque collaborators (see [`client::chain::Resolver`]/
//! [`client::chain::Dialer`] and [`head`]) rather than re-implemented from
//! scratch; this crate's job is the protocol state machines layered on top
//! of them.

pub mod client;
pub mod config;
pub mod error;
pub mod head;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{Client, ClientBuilder};
pub use config::Config;
pub use error::{EngineError, Result, TimeoutKind};
