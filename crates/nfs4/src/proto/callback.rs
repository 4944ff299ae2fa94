//! The callback program's `CB_COMPOUND4args` and `CB_COMPOUND4res`.

use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;
use xdrpack::Unpack;

use super::consts::*;
use super::types::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CbArgOp {
    Getattr { fh: Vec<u8>, attr_request: Vec<u32> },
    Recall { stateid: Stateid, truncate: bool, fh: Vec<u8> },
    /// An opcode we cannot decode. Its arguments, and everything after it,
    /// are left unread.
    Illegal { opcode: Opcode },
}

impl CbArgOp {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Getattr { .. } => Opcode::CB_GETATTR,
            Self::Recall { .. } => Opcode::CB_RECALL,
            Self::Illegal { opcode } => *opcode,
        }
    }
}

impl Pack for CbArgOp {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.opcode().0)?;
        match self {
            Self::Getattr { fh, attr_request } => {
                enc.opaque(fh)?;
                enc.array(attr_request)
            }
            Self::Recall { stateid, truncate, fh } => {
                stateid.pack(enc)?;
                enc.bool(*truncate)?;
                enc.opaque(fh)
            }
            Self::Illegal { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbCompoundArgs {
    pub tag: String,
    pub minor_version: u32,
    pub callback_ident: u32,
    pub ops: Vec<CbArgOp>,
}

impl Pack for CbCompoundArgs {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.string(&self.tag)?;
        enc.u32(self.minor_version)?;
        enc.u32(self.callback_ident)?;
        enc.array(&self.ops)
    }
}

impl Unpack for CbCompoundArgs {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        let tag = dec.unpack()?;
        let minor_version = dec.u32()?;
        let callback_ident = dec.u32()?;
        let count = dec.u32()? as usize;
        let max = dec.remaining() / 4;
        if count > max {
            return Err(xdrpack::Error::LengthTooLarge { len: count, max });
        }

        let mut ops = Vec::with_capacity(count);
        for _ in 0..count {
            let opcode = Opcode(dec.u32()?);
            let op = match opcode {
                Opcode::CB_GETATTR => CbArgOp::Getattr { fh: unpack_fh(dec)?, attr_request: dec.array()? },
                Opcode::CB_RECALL => CbArgOp::Recall {
                    stateid: dec.unpack()?,
                    truncate: dec.bool()?,
                    fh: unpack_fh(dec)?,
                },
                opcode => {
                    ops.push(CbArgOp::Illegal { opcode });
                    dec.rest();
                    break;
                }
            };
            ops.push(op);
        }
        Ok(Self { tag, minor_version, callback_ident, ops })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CbResBody {
    Empty,
    Getattr(Fattr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbResult {
    pub opcode: Opcode,
    pub status: Status,
    pub body: CbResBody,
}

impl CbResult {
    pub fn status_only(opcode: Opcode, status: Status) -> Self {
        Self { opcode, status, body: CbResBody::Empty }
    }
}

impl Pack for CbResult {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.opcode.0)?;
        enc.u32(self.status.0)?;
        match &self.body {
            CbResBody::Empty => Ok(()),
            CbResBody::Getattr(attrs) => attrs.pack(enc),
        }
    }
}

impl Unpack for CbResult {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        let opcode = Opcode(dec.u32()?);
        let status = Status(dec.u32()?);
        let body = if opcode == Opcode::CB_GETATTR && status.is_ok() {
            CbResBody::Getattr(dec.unpack()?)
        } else {
            CbResBody::Empty
        };
        Ok(Self { opcode, status, body })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbCompoundRes {
    pub status: Status,
    pub tag: String,
    pub results: Vec<CbResult>,
}

impl Pack for CbCompoundRes {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.status.0)?;
        enc.string(&self.tag)?;
        enc.array(&self.results)
    }
}

impl Unpack for CbCompoundRes {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { status: Status(dec.u32()?), tag: dec.unpack()?, results: dec.array()? })
    }
}
