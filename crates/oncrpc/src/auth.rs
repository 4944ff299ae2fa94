//! # Security Flavors
//!
//! A flavor supplies the credential and verifier for each call and may
//! transform procedure bodies on the way out and back in. `AuthNone` and
//! `AuthSys` leave bodies untouched.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;
use xdrpack::Unpack;

use crate::client::RpcClient;
use crate::error::Result;
use crate::message::AUTH_NONE;
use crate::message::AUTH_SYS;
use crate::message::OpaqueAuth;

pub const MAX_MACHINE_NAME: usize = 255;
pub const MAX_GIDS: usize = 16;

/// Pluggable credential/verifier scheme.
#[async_trait::async_trait]
pub trait SecurityFlavor: Send + Sync + 'static {
    fn flavor(&self) -> u32;

    /// Runs once after the client connects, before any call is issued.
    async fn initialize(&self, _client: &RpcClient) -> Result<()> {
        Ok(())
    }

    /// Returns the credential for the next call and the sequence number that
    /// `secure`/`unsecure` will be given for it.
    fn make_credential(&self) -> Result<(OpaqueAuth, u32)>;

    /// Computes the verifier over the encoded header (xid through credential).
    fn make_verifier(&self, _header: &[u8]) -> Result<OpaqueAuth> {
        Ok(OpaqueAuth::none())
    }

    fn secure(&self, payload: Vec<u8>, _sequence: u32) -> Result<Vec<u8>> {
        Ok(payload)
    }

    fn unsecure(&self, payload: Vec<u8>, _sequence: u32) -> Result<Vec<u8>> {
        Ok(payload)
    }

    /// Verifier placed in replies when serving inbound calls.
    fn make_reply_verifier(&self, _credential: &OpaqueAuth, _verifier: &OpaqueAuth) -> Result<OpaqueAuth> {
        Ok(OpaqueAuth::none())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthNone;

#[async_trait::async_trait]
impl SecurityFlavor for AuthNone {
    fn flavor(&self) -> u32 {
        AUTH_NONE
    }

    fn make_credential(&self) -> Result<(OpaqueAuth, u32)> {
        Ok((OpaqueAuth::none(), 0))
    }
}

/// `authsys_parms` from RFC 5531.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSysParams {
    pub stamp: u32,
    pub machine_name: String,
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
}

impl Pack for AuthSysParams {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        if self.machine_name.len() > MAX_MACHINE_NAME {
            return Err(xdrpack::Error::LengthTooLarge { len: self.machine_name.len(), max: MAX_MACHINE_NAME });
        }
        if self.gids.len() > MAX_GIDS {
            return Err(xdrpack::Error::LengthTooLarge { len: self.gids.len(), max: MAX_GIDS });
        }
        enc.u32(self.stamp)?;
        enc.string(&self.machine_name)?;
        enc.u32(self.uid)?;
        enc.u32(self.gid)?;
        enc.array(&self.gids)
    }
}

impl Unpack for AuthSysParams {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self {
            stamp: dec.u32()?,
            machine_name: dec.string_max(MAX_MACHINE_NAME)?.to_string(),
            uid: dec.u32()?,
            gid: dec.u32()?,
            gids: dec.array_max(MAX_GIDS)?,
        })
    }
}

/// Unix identity credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSys {
    params: AuthSysParams,
}

impl AuthSys {
    /// Stamps the credential with the current time.
    pub fn new(machine_name: impl Into<String>, uid: u32, gid: u32) -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        Self {
            params: AuthSysParams { stamp, machine_name: machine_name.into(), uid, gid, gids: Vec::new() },
        }
    }

    pub fn stamp(mut self, stamp: u32) -> Self {
        self.params.stamp = stamp;
        self
    }

    /// Supplementary groups; more than 16 fail when the credential is built.
    pub fn gids(mut self, gids: Vec<u32>) -> Self {
        self.params.gids = gids;
        self
    }

    pub fn params(&self) -> &AuthSysParams {
        &self.params
    }
}

#[async_trait::async_trait]
impl SecurityFlavor for AuthSys {
    fn flavor(&self) -> u32 {
        AUTH_SYS
    }

    fn make_credential(&self) -> Result<(OpaqueAuth, u32)> {
        let body = xdrpack::to_bytes(&self.params)?;
        Ok((OpaqueAuth::new(AUTH_SYS, body), 0))
    }
}
