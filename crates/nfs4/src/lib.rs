//! # nfs4
//!
//! An NFSv4.0 client engine: COMPOUND calls over `oncrpc`, strict
//! validation of partial-execution replies, seqid and client id tracking,
//! and a callback listener for delegation recalls.
//!
//! ## Architecture
//!
//! - `proto`: the wire catalog (operations, results, attributes, callback
//!   program), written against `xdrpack`.
//! - `compound`: reply validation, independent of any transport.
//! - `session`: client identity, per-owner seqids, callback identifiers.
//! - `callback`: the inbound program the server uses to recall delegations.
//! - `client`: `Nfs4Client`, tying the above to an `oncrpc::RpcClient`.

pub mod callback;
pub mod client;
pub mod compound;
pub mod config;
pub mod error;
pub mod proto;
pub mod session;

pub use callback::CallbackListener;
pub use callback::Recall;
pub use callback::RecallRegistry;
pub use client::LockRange;
pub use client::Nfs4Client;
pub use client::OpenOptions;
pub use client::OpenedFile;
pub use client::check_result;
pub use client::use_path;
pub use config::CallbackConfig;
pub use config::ClientConfig;
pub use config::Security;
pub use error::Error;
pub use error::InvalidCompoundResponse;
pub use error::Result;
pub use session::OwnerKey;
pub use session::SessionState;
