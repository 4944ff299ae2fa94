//! # Error Definitions
//!
//! A compound reply whose status is not OK is still a valid reply and is
//! returned as data. The variants here cover replies that break the compound
//! contract, envelope and transport failures underneath, and the helpers
//! that insist on success.

use std::fmt;

use crate::proto::Opcode;
use crate::proto::Status;

/// A reply that violates the partial-execution rules of COMPOUND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCompoundResponse {
    pub reason: String,
    /// The overall status the server sent.
    pub status: Status,
}

impl fmt::Display for InvalidCompoundResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.reason, self.status)
    }
}

/// A compound that completed with a failing status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadStatus {
    /// The last operation the server ran, when it ran any.
    pub opcode: Option<Opcode>,
    pub status: Status,
    pub message: String,
}

impl fmt::Display for BadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode {
            Some(opcode) => write!(f, "{} returned {}", opcode, self.status)?,
            None => write!(f, "compound returned {}", self.status)?,
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Rpc(oncrpc::Error),
    Codec(xdrpack::Error),
    InvalidCompound(InvalidCompoundResponse),
    Status(BadStatus),
    /// A stateful operation was requested before SETCLIENTID_CONFIRM.
    NotConfirmed,
    /// A result was missing or of the wrong shape.
    UnexpectedResult(String),
    /// The callback listener could not be started or controlled.
    Listener(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e) => write!(f, "RPC error: {}", e),
            Self::Codec(e) => write!(f, "XDR error: {}", e),
            Self::InvalidCompound(e) => write!(f, "Invalid compound response: {}", e),
            Self::Status(e) => write!(f, "{}", e),
            Self::NotConfirmed => write!(f, "Client id is not confirmed"),
            Self::UnexpectedResult(msg) => write!(f, "Unexpected result: {}", msg),
            Self::Listener(msg) => write!(f, "Callback listener: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<oncrpc::Error> for Error {
    fn from(e: oncrpc::Error) -> Self {
        Self::Rpc(e)
    }
}

impl From<oncrpc::TransportError> for Error {
    fn from(e: oncrpc::TransportError) -> Self {
        Self::Rpc(oncrpc::Error::Transport(e))
    }
}

impl From<xdrpack::Error> for Error {
    fn from(e: xdrpack::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<InvalidCompoundResponse> for Error {
    fn from(e: InvalidCompoundResponse) -> Self {
        Self::InvalidCompound(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
