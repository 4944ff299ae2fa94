//! `COMPOUND4args` and `COMPOUND4res`.

use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;
use xdrpack::Unpack;

use super::consts::Status;
use super::ops::ArgOp;
use super::ops::OpResult;

/// Smallest encoding of one `nfs_resop4`: an opcode and a status.
const MIN_RESULT_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundArgs {
    pub tag: String,
    pub minor_version: u32,
    pub ops: Vec<ArgOp>,
}

impl Pack for CompoundArgs {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.string(&self.tag)?;
        enc.u32(self.minor_version)?;
        enc.array(&self.ops)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundRes {
    pub status: Status,
    pub tag: String,
    pub results: Vec<OpResult>,
}

impl CompoundRes {
    pub fn last(&self) -> Option<&OpResult> {
        self.results.last()
    }

    /// The first result carrying `opcode`.
    pub fn find(&self, opcode: super::consts::Opcode) -> Option<&OpResult> {
        self.results.iter().find(|res| res.opcode == opcode)
    }
}

impl Pack for CompoundRes {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.status.0)?;
        enc.string(&self.tag)?;
        enc.array(&self.results)
    }
}

impl Unpack for CompoundRes {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        let status = Status(dec.u32()?);
        let tag = dec.unpack()?;
        let count = dec.u32()? as usize;
        let max = dec.remaining() / MIN_RESULT_SIZE;
        if count > max {
            return Err(xdrpack::Error::LengthTooLarge { len: count, max });
        }
        let mut results = Vec::with_capacity(count);
        for i in 0..count {
            results.push(OpResult::unpack(dec, i + 1 == count)?);
        }
        Ok(Self { status, tag, results })
    }
}
