//! # oncrpc
//!
//! ONC RPC (RFC 5531) over record-marked byte streams.
//!
//! ## Architecture
//!
//! - `record`: fragment framing.
//! - `connection`: one stream behind split, separately locked halves, with
//!   epoch-guarded reconnects.
//! - `mux`: xid correlation for concurrent callers sharing one connection.
//! - `auth`: pluggable credential/verifier flavors.
//! - `client`: call building and reply classification.
//! - `server`: the inbound side, for programs the peer calls back into.

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
#[cfg(any(test, feature = "test-util"))]
pub mod mock_stream;
pub mod mux;
pub mod record;
pub mod server;

pub use auth::AuthNone;
pub use auth::AuthSys;
pub use auth::SecurityFlavor;
pub use client::RpcClient;
pub use config::ClientConfig;
pub use config::ConnectionConfig;
pub use error::Error;
pub use error::Result;
pub use error::TransportError;

#[cfg(test)]
mod tests;
