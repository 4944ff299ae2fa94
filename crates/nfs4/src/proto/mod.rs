//! # Protocol Catalog
//!
//! Wire types for NFSv4.0 and its callback program, written against
//! `xdrpack`. Only what the engine sends or must understand is modelled;
//! everything else travels as raw bytes.

pub mod attr;
pub mod callback;
pub mod compound;
pub mod consts;
pub mod ops;
pub mod types;

pub use callback::CbArgOp;
pub use callback::CbCompoundArgs;
pub use callback::CbCompoundRes;
pub use callback::CbResBody;
pub use callback::CbResult;
pub use compound::CompoundArgs;
pub use compound::CompoundRes;
pub use consts::Opcode;
pub use consts::Status;
pub use ops::ArgOp;
pub use ops::OpResult;
pub use ops::ResBody;
pub use types::*;
