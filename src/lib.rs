//! frameserve: a TCP application server framework
//!
//! Accepts TCP connections, frames a length-prefixed binary protocol on the
//! byte stream and routes each message to the handler registered for its
//! kind.
//!
//! Features:
//! - 8-byte little-endian header (`length`, `kind`) with a size limit
//! - Per-kind routers with pre/handle/post stages
//! - Optional worker pool that keeps each connection's requests in order
//! - Unbuffered and buffered send paths per connection
//! - Connection registry with admission control and lifecycle hooks
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod connection;
pub mod dispatch;
mod error;
pub mod message;
pub mod protocol;
pub mod protocols;
pub mod registry;
pub mod request;
pub mod router;
pub mod server;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use connection::{Connection, Property};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use message::Message;
pub use protocol::{DataPack, Header, HEADER_LEN};
pub use registry::ConnectionRegistry;
pub use request::Request;
pub use router::{handler_fn, HandlerFn, Router};
pub use server::{Hooks, Server};
