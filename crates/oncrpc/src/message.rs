//! # Message Envelope
//!
//! The RFC 5531 call and reply headers. Procedure arguments and results are
//! opaque to this layer; they follow the header in the same record.

use std::fmt;

use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;
use xdrpack::Unpack;

pub const RPC_VERSION: u32 = 2;

pub const CALL: u32 = 0;
pub const REPLY: u32 = 1;

pub const MSG_ACCEPTED: u32 = 0;
pub const MSG_DENIED: u32 = 1;

pub const SUCCESS: u32 = 0;
pub const PROG_UNAVAIL: u32 = 1;
pub const PROG_MISMATCH: u32 = 2;
pub const PROC_UNAVAIL: u32 = 3;
pub const GARBAGE_ARGS: u32 = 4;
pub const SYSTEM_ERR: u32 = 5;

pub const RPC_MISMATCH: u32 = 0;
pub const AUTH_ERROR: u32 = 1;

pub const AUTH_NONE: u32 = 0;
pub const AUTH_SYS: u32 = 1;

/// Upper bound on credential and verifier bodies.
pub const MAX_AUTH_BYTES: usize = 400;

/// Credential or verifier: a flavor tag plus flavor-specific bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpaqueAuth {
    pub flavor: u32,
    pub body: Vec<u8>,
}

impl OpaqueAuth {
    pub fn new(flavor: u32, body: Vec<u8>) -> Self {
        Self { flavor, body }
    }

    /// The empty `AUTH_NONE` credential/verifier.
    pub fn none() -> Self {
        Self { flavor: AUTH_NONE, body: Vec::new() }
    }
}

impl Pack for OpaqueAuth {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        if self.body.len() > MAX_AUTH_BYTES {
            return Err(xdrpack::Error::LengthTooLarge { len: self.body.len(), max: MAX_AUTH_BYTES });
        }
        enc.u32(self.flavor)?;
        enc.opaque(&self.body)
    }
}

impl Unpack for OpaqueAuth {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        let flavor = dec.u32()?;
        let body = dec.opaque_max(MAX_AUTH_BYTES)?.to_vec();
        Ok(Self { flavor, body })
    }
}

/// The call header up to and including the credential.
///
/// The verifier is packed separately because some flavors compute it over
/// the bytes of this header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHeader {
    pub xid: u32,
    pub rpc_version: u32,
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
    pub credential: OpaqueAuth,
}

impl Pack for CallHeader {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.xid)?;
        enc.u32(CALL)?;
        enc.u32(self.rpc_version)?;
        enc.u32(self.program)?;
        enc.u32(self.version)?;
        enc.u32(self.procedure)?;
        self.credential.pack(enc)
    }
}

impl Unpack for CallHeader {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        let xid = dec.u32()?;
        let msg_type = dec.u32()?;
        if msg_type != CALL {
            return Err(xdrpack::Error::InvalidDiscriminant { type_name: "msg_type", value: msg_type });
        }
        Ok(Self {
            xid,
            rpc_version: dec.u32()?,
            program: dec.u32()?,
            version: dec.u32()?,
            procedure: dec.u32()?,
            credential: dec.unpack()?,
        })
    }
}

/// `auth_stat` from a denied reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthStat(pub u32);

impl AuthStat {
    pub const OK: Self = Self(0);
    pub const BADCRED: Self = Self(1);
    pub const REJECTEDCRED: Self = Self(2);
    pub const BADVERF: Self = Self(3);
    pub const REJECTEDVERF: Self = Self(4);
    pub const TOOWEAK: Self = Self(5);
    pub const INVALIDRESP: Self = Self(6);
    pub const FAILED: Self = Self(7);

    pub fn name(&self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "AUTH_OK",
            1 => "AUTH_BADCRED",
            2 => "AUTH_REJECTEDCRED",
            3 => "AUTH_BADVERF",
            4 => "AUTH_REJECTEDVERF",
            5 => "AUTH_TOOWEAK",
            6 => "AUTH_INVALIDRESP",
            7 => "AUTH_FAILED",
            _ => return None,
        })
    }
}

impl fmt::Display for AuthStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "auth_stat({})", self.0),
        }
    }
}

/// Why a call was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    RpcMismatch { low: u32, high: u32 },
    AuthError(AuthStat),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RpcMismatch { low, high } => write!(f, "RPC_MISMATCH (supported {}..={})", low, high),
            Self::AuthError(stat) => write!(f, "AUTH_ERROR {}", stat),
        }
    }
}

/// Non-success status of an accepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptError {
    ProgUnavail,
    ProgMismatch { low: u32, high: u32 },
    ProcUnavail,
    GarbageArgs,
    SystemErr,
}

impl AcceptError {
    pub fn as_tag(&self) -> u32 {
        match self {
            Self::ProgUnavail => PROG_UNAVAIL,
            Self::ProgMismatch { .. } => PROG_MISMATCH,
            Self::ProcUnavail => PROC_UNAVAIL,
            Self::GarbageArgs => GARBAGE_ARGS,
            Self::SystemErr => SYSTEM_ERR,
        }
    }
}

impl fmt::Display for AcceptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProgUnavail => f.write_str("PROG_UNAVAIL"),
            Self::ProgMismatch { low, high } => write!(f, "PROG_MISMATCH (supported {}..={})", low, high),
            Self::ProcUnavail => f.write_str("PROC_UNAVAIL"),
            Self::GarbageArgs => f.write_str("GARBAGE_ARGS"),
            Self::SystemErr => f.write_str("SYSTEM_ERR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// On `Ok(())` the procedure results follow the header.
    Accepted { verifier: OpaqueAuth, result: Result<(), AcceptError> },
    Denied(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub xid: u32,
    pub body: ReplyBody,
}

impl ReplyHeader {
    pub fn success(xid: u32, verifier: OpaqueAuth) -> Self {
        Self { xid, body: ReplyBody::Accepted { verifier, result: Ok(()) } }
    }

    pub fn accepted_error(xid: u32, verifier: OpaqueAuth, error: AcceptError) -> Self {
        Self { xid, body: ReplyBody::Accepted { verifier, result: Err(error) } }
    }

    pub fn denied(xid: u32, reason: RejectReason) -> Self {
        Self { xid, body: ReplyBody::Denied(reason) }
    }
}

impl Pack for ReplyHeader {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.xid)?;
        enc.u32(REPLY)?;
        match &self.body {
            ReplyBody::Accepted { verifier, result } => {
                enc.u32(MSG_ACCEPTED)?;
                verifier.pack(enc)?;
                match result {
                    Ok(()) => enc.u32(SUCCESS),
                    Err(error) => {
                        enc.u32(error.as_tag())?;
                        if let AcceptError::ProgMismatch { low, high } = error {
                            enc.u32(*low)?;
                            enc.u32(*high)?;
                        }
                        Ok(())
                    }
                }
            }
            ReplyBody::Denied(reason) => {
                enc.u32(MSG_DENIED)?;
                match reason {
                    RejectReason::RpcMismatch { low, high } => {
                        enc.u32(RPC_MISMATCH)?;
                        enc.u32(*low)?;
                        enc.u32(*high)
                    }
                    RejectReason::AuthError(stat) => {
                        enc.u32(AUTH_ERROR)?;
                        enc.u32(stat.0)
                    }
                }
            }
        }
    }
}

impl Unpack for ReplyHeader {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        let xid = dec.u32()?;
        let msg_type = dec.u32()?;
        if msg_type != REPLY {
            return Err(xdrpack::Error::InvalidDiscriminant { type_name: "msg_type", value: msg_type });
        }
        let body = match dec.u32()? {
            MSG_ACCEPTED => {
                let verifier = dec.unpack()?;
                let result = match dec.u32()? {
                    SUCCESS => Ok(()),
                    PROG_UNAVAIL => Err(AcceptError::ProgUnavail),
                    PROG_MISMATCH => Err(AcceptError::ProgMismatch { low: dec.u32()?, high: dec.u32()? }),
                    PROC_UNAVAIL => Err(AcceptError::ProcUnavail),
                    GARBAGE_ARGS => Err(AcceptError::GarbageArgs),
                    SYSTEM_ERR => Err(AcceptError::SystemErr),
                    value => {
                        return Err(xdrpack::Error::InvalidDiscriminant { type_name: "accept_stat", value });
                    }
                };
                ReplyBody::Accepted { verifier, result }
            }
            MSG_DENIED => match dec.u32()? {
                RPC_MISMATCH => ReplyBody::Denied(RejectReason::RpcMismatch { low: dec.u32()?, high: dec.u32()? }),
                AUTH_ERROR => ReplyBody::Denied(RejectReason::AuthError(AuthStat(dec.u32()?))),
                value => {
                    return Err(xdrpack::Error::InvalidDiscriminant { type_name: "reject_stat", value });
                }
            },
            value => return Err(xdrpack::Error::InvalidDiscriminant { type_name: "reply_stat", value }),
        };
        Ok(Self { xid, body })
    }
}

/// Reads the xid at the front of a record without decoding the rest.
pub fn peek_xid(record: &[u8]) -> xdrpack::Result<u32> {
    Decoder::new(record).u32()
}
