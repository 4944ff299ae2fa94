//! # Error Definitions
//!
//! Transport failures, codec failures and the two ways a peer can refuse a
//! call (denied at the envelope, or accepted with a failing status).

use std::fmt;

use crate::message::AcceptError;
use crate::message::RejectReason;

/// Errors that occur at the stream layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// A read or write did not complete within the configured timeout.
    Timeout,
    /// An incoming record exceeded the configured maximum.
    RecordTooLarge { len: usize, max: usize },
    /// Generic I/O failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::RecordTooLarge { len, max } => {
                write!(f, "Record of {} bytes exceeds maximum of {}", len, max)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

/// Everything that can go wrong while issuing or serving a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Transport(TransportError),
    Codec(xdrpack::Error),
    /// The peer rejected the call envelope.
    Denied(RejectReason),
    /// The peer accepted the envelope but could not run the procedure.
    Accepted(AcceptError),
    /// A reply arrived for an xid nobody is waiting on.
    UnexpectedReply { received: u32, expected: u32 },
    /// `listen` was asked for an xid that is not outstanding.
    UnknownXid(u32),
    /// An xid was registered twice.
    DuplicateXid(u32),
    Protocol(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Codec(e) => write!(f, "XDR error: {}", e),
            Self::Denied(reason) => write!(f, "Call denied: {}", reason),
            Self::Accepted(status) => write!(f, "Call failed: {}", status),
            Self::UnexpectedReply { received, expected } => {
                write!(f, "Unexpected reply xid {} while waiting for {}", received, expected)
            }
            Self::UnknownXid(xid) => write!(f, "Xid {} is not outstanding", xid),
            Self::DuplicateXid(xid) => write!(f, "Xid {} is already outstanding", xid),
            Self::Protocol(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<xdrpack::Error> for Error {
    fn from(e: xdrpack::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
