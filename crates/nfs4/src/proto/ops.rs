//! # Operation Catalog
//!
//! The compound operations this engine issues, as an enum keyed by opcode.
//! `ArgOp::Raw` carries pre-encoded arguments for anything not modelled here.
//!
//! Results are decoded for every v4.0 opcode, including ones only ever sent
//! through `ArgOp::Raw` (ACCESS, SETATTR, READDIR, ...). A result for any
//! other opcode has no known length, so its payload is kept as
//! `ResBody::Raw` when it is the last result and is a decode error anywhere
//! else.

use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;

use super::consts::*;
use super::types::*;

/// One `nfs_argop4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgOp {
    Close { seqid: u32, open_stateid: Stateid },
    Commit { offset: u64, count: u32 },
    Delegreturn { deleg_stateid: Stateid },
    Getattr { attr_request: Vec<u32> },
    Getfh,
    Lock { locktype: LockType, reclaim: bool, offset: u64, length: u64, locker: Locker },
    Lockt { locktype: LockType, offset: u64, length: u64, owner: StateOwner },
    Locku { locktype: LockType, seqid: u32, lock_stateid: Stateid, offset: u64, length: u64 },
    Lookup { objname: String },
    Open { seqid: u32, share_access: u32, share_deny: u32, owner: StateOwner, openhow: OpenHow, claim: OpenClaim },
    OpenConfirm { open_stateid: Stateid, seqid: u32 },
    OpenDowngrade { open_stateid: Stateid, seqid: u32, share_access: u32, share_deny: u32 },
    Putfh { object: Vec<u8> },
    Putrootfh,
    Read { stateid: Stateid, offset: u64, count: u32 },
    Remove { target: String },
    Renew { clientid: u64 },
    Restorefh,
    Savefh,
    Setclientid { client: ClientId, callback: CbClient, callback_ident: u32 },
    SetclientidConfirm { clientid: u64, confirm: [u8; NFS4_VERIFIER_SIZE] },
    Write { stateid: Stateid, offset: u64, stable: StableHow, data: Vec<u8> },
    /// Any opcode with already-encoded arguments.
    Raw { opcode: Opcode, body: Vec<u8> },
}

impl ArgOp {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Close { .. } => Opcode::CLOSE,
            Self::Commit { .. } => Opcode::COMMIT,
            Self::Delegreturn { .. } => Opcode::DELEGRETURN,
            Self::Getattr { .. } => Opcode::GETATTR,
            Self::Getfh => Opcode::GETFH,
            Self::Lock { .. } => Opcode::LOCK,
            Self::Lockt { .. } => Opcode::LOCKT,
            Self::Locku { .. } => Opcode::LOCKU,
            Self::Lookup { .. } => Opcode::LOOKUP,
            Self::Open { .. } => Opcode::OPEN,
            Self::OpenConfirm { .. } => Opcode::OPEN_CONFIRM,
            Self::OpenDowngrade { .. } => Opcode::OPEN_DOWNGRADE,
            Self::Putfh { .. } => Opcode::PUTFH,
            Self::Putrootfh => Opcode::PUTROOTFH,
            Self::Read { .. } => Opcode::READ,
            Self::Remove { .. } => Opcode::REMOVE,
            Self::Renew { .. } => Opcode::RENEW,
            Self::Restorefh => Opcode::RESTOREFH,
            Self::Savefh => Opcode::SAVEFH,
            Self::Setclientid { .. } => Opcode::SETCLIENTID,
            Self::SetclientidConfirm { .. } => Opcode::SETCLIENTID_CONFIRM,
            Self::Write { .. } => Opcode::WRITE,
            Self::Raw { opcode, .. } => *opcode,
        }
    }
}

impl Pack for ArgOp {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.opcode().0)?;
        match self {
            Self::Close { seqid, open_stateid } => {
                enc.u32(*seqid)?;
                open_stateid.pack(enc)
            }
            Self::Commit { offset, count } => {
                enc.u64(*offset)?;
                enc.u32(*count)
            }
            Self::Delegreturn { deleg_stateid } => deleg_stateid.pack(enc),
            Self::Getattr { attr_request } => enc.array(attr_request),
            Self::Getfh | Self::Putrootfh | Self::Restorefh | Self::Savefh => Ok(()),
            Self::Lock { locktype, reclaim, offset, length, locker } => {
                enc.u32(*locktype as u32)?;
                enc.bool(*reclaim)?;
                enc.u64(*offset)?;
                enc.u64(*length)?;
                locker.pack(enc)
            }
            Self::Lockt { locktype, offset, length, owner } => {
                enc.u32(*locktype as u32)?;
                enc.u64(*offset)?;
                enc.u64(*length)?;
                owner.pack(enc)
            }
            Self::Locku { locktype, seqid, lock_stateid, offset, length } => {
                enc.u32(*locktype as u32)?;
                enc.u32(*seqid)?;
                lock_stateid.pack(enc)?;
                enc.u64(*offset)?;
                enc.u64(*length)
            }
            Self::Lookup { objname } => enc.string(objname),
            Self::Open { seqid, share_access, share_deny, owner, openhow, claim } => {
                enc.u32(*seqid)?;
                enc.u32(*share_access)?;
                enc.u32(*share_deny)?;
                owner.pack(enc)?;
                openhow.pack(enc)?;
                claim.pack(enc)
            }
            Self::OpenConfirm { open_stateid, seqid } => {
                open_stateid.pack(enc)?;
                enc.u32(*seqid)
            }
            Self::OpenDowngrade { open_stateid, seqid, share_access, share_deny } => {
                open_stateid.pack(enc)?;
                enc.u32(*seqid)?;
                enc.u32(*share_access)?;
                enc.u32(*share_deny)
            }
            Self::Putfh { object } => enc.opaque(object),
            Self::Read { stateid, offset, count } => {
                stateid.pack(enc)?;
                enc.u64(*offset)?;
                enc.u32(*count)
            }
            Self::Remove { target } => enc.string(target),
            Self::Renew { clientid } => enc.u64(*clientid),
            Self::Setclientid { client, callback, callback_ident } => {
                client.pack(enc)?;
                callback.pack(enc)?;
                enc.u32(*callback_ident)
            }
            Self::SetclientidConfirm { clientid, confirm } => {
                enc.u64(*clientid)?;
                enc.pack(confirm)
            }
            Self::Write { stateid, offset, stable, data } => {
                stateid.pack(enc)?;
                enc.u64(*offset)?;
                enc.u32(*stable as u32)?;
                enc.opaque(data)
            }
            Self::Raw { body, .. } => enc.raw(body),
        }
    }
}

/// `OPEN4resok`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOk {
    pub stateid: Stateid,
    pub cinfo: ChangeInfo,
    pub rflags: u32,
    pub attrset: Vec<u32>,
    pub delegation: OpenDelegation,
}

/// `WRITE4resok`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOk {
    pub count: u32,
    pub committed: StableHow,
    pub writeverf: [u8; NFS4_VERIFIER_SIZE],
}

/// The part of an `nfs_resop4` after the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResBody {
    /// Failed results, and operations whose success carries nothing.
    Empty,
    Stateid(Stateid),
    Commit { writeverf: [u8; NFS4_VERIFIER_SIZE] },
    Getattr(Fattr),
    Getfh(Vec<u8>),
    LockDenied(LockDenied),
    Open(OpenOk),
    Read { eof: bool, data: Vec<u8> },
    Remove(ChangeInfo),
    Setclientid { clientid: u64, confirm: [u8; NFS4_VERIFIER_SIZE] },
    ClientInUse(ClientAddr),
    Write(WriteOk),
    Access { supported: u32, access: u32 },
    Create { cinfo: ChangeInfo, attrset: Vec<u32> },
    Link(ChangeInfo),
    Readdir { cookieverf: [u8; NFS4_VERIFIER_SIZE], entries: Vec<DirEntry>, eof: bool },
    Readlink(String),
    Rename { source: ChangeInfo, target: ChangeInfo },
    Secinfo(Vec<Secinfo>),
    /// SETATTR reports the attributes it set whether or not it failed.
    Setattr(Vec<u32>),
    /// Undecoded payload of an opcode outside v4.0.
    Raw(Vec<u8>),
}

/// One `nfs_resop4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpResult {
    pub opcode: Opcode,
    pub status: Status,
    pub body: ResBody,
}

impl OpResult {
    pub fn new(opcode: Opcode, status: Status, body: ResBody) -> Self {
        Self { opcode, status, body }
    }

    /// A result carrying nothing but its status.
    pub fn status_only(opcode: Opcode, status: Status) -> Self {
        Self { opcode, status, body: ResBody::Empty }
    }

    pub fn stateid(&self) -> Option<Stateid> {
        match &self.body {
            ResBody::Stateid(stateid) => Some(*stateid),
            ResBody::Open(open) => Some(open.stateid),
            _ => None,
        }
    }

    pub fn filehandle(&self) -> Option<&[u8]> {
        match &self.body {
            ResBody::Getfh(fh) => Some(fh),
            _ => None,
        }
    }

    /// Decodes one result. `last` tells whether the payload of an opcode
    /// outside v4.0 may take the remainder of the buffer.
    pub fn unpack(dec: &mut Decoder<'_>, last: bool) -> xdrpack::Result<Self> {
        let opcode = Opcode(dec.u32()?);
        let status = Status(dec.u32()?);
        let body = if status.is_ok() {
            unpack_ok_body(opcode, dec, last)?
        } else {
            match (opcode, status) {
                (Opcode::LOCK, Status::DENIED) | (Opcode::LOCKT, Status::DENIED) => {
                    ResBody::LockDenied(dec.unpack()?)
                }
                (Opcode::SETCLIENTID, Status::CLID_INUSE) => ResBody::ClientInUse(dec.unpack()?),
                (Opcode::SETATTR, _) => ResBody::Setattr(dec.array()?),
                _ if last && !opcode.is_known() && dec.remaining() > 0 => ResBody::Raw(dec.rest().to_vec()),
                _ => ResBody::Empty,
            }
        };
        Ok(Self { opcode, status, body })
    }
}

fn unpack_ok_body(opcode: Opcode, dec: &mut Decoder<'_>, last: bool) -> xdrpack::Result<ResBody> {
    Ok(match opcode {
        Opcode::CLOSE | Opcode::LOCK | Opcode::LOCKU | Opcode::OPEN_CONFIRM | Opcode::OPEN_DOWNGRADE => {
            ResBody::Stateid(dec.unpack()?)
        }
        Opcode::COMMIT => ResBody::Commit { writeverf: dec.unpack()? },
        Opcode::GETATTR => ResBody::Getattr(dec.unpack()?),
        Opcode::GETFH => ResBody::Getfh(unpack_fh(dec)?),
        Opcode::OPEN => ResBody::Open(OpenOk {
            stateid: dec.unpack()?,
            cinfo: dec.unpack()?,
            rflags: dec.u32()?,
            attrset: dec.array()?,
            delegation: dec.unpack()?,
        }),
        Opcode::READ => ResBody::Read { eof: dec.bool()?, data: dec.opaque()?.to_vec() },
        Opcode::REMOVE => ResBody::Remove(dec.unpack()?),
        Opcode::SETCLIENTID => ResBody::Setclientid { clientid: dec.u64()?, confirm: dec.unpack()? },
        Opcode::WRITE => ResBody::Write(WriteOk {
            count: dec.u32()?,
            committed: StableHow::from_u32(dec.u32()?)?,
            writeverf: dec.unpack()?,
        }),
        Opcode::ACCESS => ResBody::Access { supported: dec.u32()?, access: dec.u32()? },
        Opcode::CREATE => ResBody::Create { cinfo: dec.unpack()?, attrset: dec.array()? },
        Opcode::LINK => ResBody::Link(dec.unpack()?),
        Opcode::READDIR => ResBody::Readdir {
            cookieverf: dec.unpack()?,
            entries: unpack_entries(dec)?,
            eof: dec.bool()?,
        },
        Opcode::READLINK => ResBody::Readlink(dec.string()?.to_string()),
        Opcode::RENAME => ResBody::Rename { source: dec.unpack()?, target: dec.unpack()? },
        Opcode::SECINFO => ResBody::Secinfo(dec.array()?),
        Opcode::SETATTR => ResBody::Setattr(dec.array()?),
        Opcode::DELEGPURGE
        | Opcode::DELEGRETURN
        | Opcode::LOCKT
        | Opcode::LOOKUP
        | Opcode::LOOKUPP
        | Opcode::NVERIFY
        | Opcode::OPENATTR
        | Opcode::VERIFY
        | Opcode::PUTFH
        | Opcode::PUTROOTFH
        | Opcode::PUTPUBFH
        | Opcode::RELEASE_LOCKOWNER
        | Opcode::RENEW
        | Opcode::RESTOREFH
        | Opcode::SAVEFH
        | Opcode::SETCLIENTID_CONFIRM
        | Opcode::ILLEGAL => ResBody::Empty,
        _ if last => ResBody::Raw(dec.rest().to_vec()),
        _ => return Err(xdrpack::Error::InvalidDiscriminant { type_name: "nfs_resop4", value: opcode.0 }),
    })
}

impl Pack for OpResult {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.opcode.0)?;
        enc.u32(self.status.0)?;
        match &self.body {
            ResBody::Empty => Ok(()),
            ResBody::Stateid(stateid) => stateid.pack(enc),
            ResBody::Commit { writeverf } => enc.pack(writeverf),
            ResBody::Getattr(fattr) => fattr.pack(enc),
            ResBody::Getfh(fh) => enc.opaque(fh),
            ResBody::LockDenied(denied) => denied.pack(enc),
            ResBody::Open(open) => {
                open.stateid.pack(enc)?;
                open.cinfo.pack(enc)?;
                enc.u32(open.rflags)?;
                enc.array(&open.attrset)?;
                open.delegation.pack(enc)
            }
            ResBody::Read { eof, data } => {
                enc.bool(*eof)?;
                enc.opaque(data)
            }
            ResBody::Remove(cinfo) => cinfo.pack(enc),
            ResBody::Setclientid { clientid, confirm } => {
                enc.u64(*clientid)?;
                enc.pack(confirm)
            }
            ResBody::ClientInUse(addr) => addr.pack(enc),
            ResBody::Write(write) => {
                enc.u32(write.count)?;
                enc.u32(write.committed as u32)?;
                enc.pack(&write.writeverf)
            }
            ResBody::Access { supported, access } => {
                enc.u32(*supported)?;
                enc.u32(*access)
            }
            ResBody::Create { cinfo, attrset } => {
                cinfo.pack(enc)?;
                enc.array(attrset)
            }
            ResBody::Link(cinfo) => cinfo.pack(enc),
            ResBody::Readdir { cookieverf, entries, eof } => {
                enc.pack(cookieverf)?;
                pack_entries(enc, entries)?;
                enc.bool(*eof)
            }
            ResBody::Readlink(link) => enc.string(link),
            ResBody::Rename { source, target } => {
                source.pack(enc)?;
                target.pack(enc)
            }
            ResBody::Secinfo(flavors) => enc.array(flavors),
            ResBody::Setattr(attrsset) => enc.array(attrsset),
            ResBody::Raw(body) => enc.raw(body),
        }
    }
}
