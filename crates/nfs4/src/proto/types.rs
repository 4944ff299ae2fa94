//! Structures shared by several operations.

use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;
use xdrpack::Unpack;

use super::consts::*;

/// `stateid4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stateid {
    pub seqid: u32,
    pub other: [u8; NFS4_OTHER_SIZE],
}

impl Stateid {
    /// The anonymous stateid (all zeros).
    pub const ANONYMOUS: Stateid = Stateid { seqid: 0, other: [0; NFS4_OTHER_SIZE] };

    /// The READ bypass stateid (all ones).
    pub const BYPASS: Stateid = Stateid { seqid: u32::MAX, other: [0xff; NFS4_OTHER_SIZE] };
}

impl Pack for Stateid {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.seqid)?;
        enc.pack(&self.other)
    }
}

impl Unpack for Stateid {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { seqid: dec.u32()?, other: dec.unpack()? })
    }
}

/// `open_owner4` / `lock_owner4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateOwner {
    pub clientid: u64,
    pub owner: Vec<u8>,
}

impl Pack for StateOwner {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u64(self.clientid)?;
        enc.opaque(&self.owner)
    }
}

impl Unpack for StateOwner {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { clientid: dec.u64()?, owner: dec.opaque_max(NFS4_OPAQUE_LIMIT)?.to_vec() })
    }
}

/// `change_info4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeInfo {
    pub atomic: bool,
    pub before: u64,
    pub after: u64,
}

impl Pack for ChangeInfo {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.bool(self.atomic)?;
        enc.u64(self.before)?;
        enc.u64(self.after)
    }
}

impl Unpack for ChangeInfo {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { atomic: dec.bool()?, before: dec.u64()?, after: dec.u64()? })
    }
}

/// `clientaddr4`: a netid plus a universal address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr {
    pub netid: String,
    pub addr: String,
}

impl ClientAddr {
    /// The address used when no callback channel is offered.
    pub fn null() -> Self {
        Self { netid: "tcp".into(), addr: "0.0.0.0.0.0".into() }
    }
}

impl Pack for ClientAddr {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.string(&self.netid)?;
        enc.string(&self.addr)
    }
}

impl Unpack for ClientAddr {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { netid: dec.unpack()?, addr: dec.unpack()? })
    }
}

/// `cb_client4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbClient {
    pub program: u32,
    pub location: ClientAddr,
}

impl Pack for CbClient {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.program)?;
        self.location.pack(enc)
    }
}

impl Unpack for CbClient {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { program: dec.u32()?, location: dec.unpack()? })
    }
}

/// `nfs_client_id4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId {
    pub verifier: [u8; NFS4_VERIFIER_SIZE],
    pub id: Vec<u8>,
}

impl Pack for ClientId {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.pack(&self.verifier)?;
        enc.opaque(&self.id)
    }
}

impl Unpack for ClientId {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { verifier: dec.unpack()?, id: dec.opaque_max(NFS4_OPAQUE_LIMIT)?.to_vec() })
    }
}

/// `LOCK4denied`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDenied {
    pub offset: u64,
    pub length: u64,
    pub locktype: LockType,
    pub owner: StateOwner,
}

impl Pack for LockDenied {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u64(self.offset)?;
        enc.u64(self.length)?;
        enc.u32(self.locktype as u32)?;
        self.owner.pack(enc)
    }
}

impl Unpack for LockDenied {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self {
            offset: dec.u64()?,
            length: dec.u64()?,
            locktype: LockType::from_u32(dec.u32()?)?,
            owner: dec.unpack()?,
        })
    }
}

/// `nfsace4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nfsace {
    pub acetype: u32,
    pub flag: u32,
    pub access_mask: u32,
    pub who: String,
}

impl Pack for Nfsace {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u32(self.acetype)?;
        enc.u32(self.flag)?;
        enc.u32(self.access_mask)?;
        enc.string(&self.who)
    }
}

impl Unpack for Nfsace {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { acetype: dec.u32()?, flag: dec.u32()?, access_mask: dec.u32()?, who: dec.unpack()? })
    }
}

/// `nfs_space_limit4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceLimit {
    Size(u64),
    Blocks { num_blocks: u32, bytes_per_block: u32 },
}

impl Pack for SpaceLimit {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        match self {
            Self::Size(size) => {
                enc.u32(NFS_LIMIT_SIZE)?;
                enc.u64(*size)
            }
            Self::Blocks { num_blocks, bytes_per_block } => {
                enc.u32(NFS_LIMIT_BLOCKS)?;
                enc.u32(*num_blocks)?;
                enc.u32(*bytes_per_block)
            }
        }
    }
}

impl Unpack for SpaceLimit {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        match dec.u32()? {
            NFS_LIMIT_SIZE => Ok(Self::Size(dec.u64()?)),
            NFS_LIMIT_BLOCKS => Ok(Self::Blocks { num_blocks: dec.u32()?, bytes_per_block: dec.u32()? }),
            value => Err(xdrpack::Error::InvalidDiscriminant { type_name: "limit_by4", value }),
        }
    }
}

/// `open_delegation4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenDelegation {
    None,
    Read { stateid: Stateid, recall: bool, permissions: Nfsace },
    Write { stateid: Stateid, recall: bool, space_limit: SpaceLimit, permissions: Nfsace },
}

impl OpenDelegation {
    pub fn stateid(&self) -> Option<Stateid> {
        match self {
            Self::None => None,
            Self::Read { stateid, .. } | Self::Write { stateid, .. } => Some(*stateid),
        }
    }
}

impl Pack for OpenDelegation {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        match self {
            Self::None => enc.u32(OPEN_DELEGATE_NONE),
            Self::Read { stateid, recall, permissions } => {
                enc.u32(OPEN_DELEGATE_READ)?;
                stateid.pack(enc)?;
                enc.bool(*recall)?;
                permissions.pack(enc)
            }
            Self::Write { stateid, recall, space_limit, permissions } => {
                enc.u32(OPEN_DELEGATE_WRITE)?;
                stateid.pack(enc)?;
                enc.bool(*recall)?;
                space_limit.pack(enc)?;
                permissions.pack(enc)
            }
        }
    }
}

impl Unpack for OpenDelegation {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        match dec.u32()? {
            OPEN_DELEGATE_NONE => Ok(Self::None),
            OPEN_DELEGATE_READ => Ok(Self::Read {
                stateid: dec.unpack()?,
                recall: dec.bool()?,
                permissions: dec.unpack()?,
            }),
            OPEN_DELEGATE_WRITE => Ok(Self::Write {
                stateid: dec.unpack()?,
                recall: dec.bool()?,
                space_limit: dec.unpack()?,
                permissions: dec.unpack()?,
            }),
            value => Err(xdrpack::Error::InvalidDiscriminant { type_name: "open_delegation_type4", value }),
        }
    }
}

/// `open_claim4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenClaim {
    Null(String),
    Previous(u32),
    DelegateCur { delegate_stateid: Stateid, file: String },
    DelegatePrev(String),
}

impl Pack for OpenClaim {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        match self {
            Self::Null(file) => {
                enc.u32(CLAIM_NULL)?;
                enc.string(file)
            }
            Self::Previous(delegate_type) => {
                enc.u32(CLAIM_PREVIOUS)?;
                enc.u32(*delegate_type)
            }
            Self::DelegateCur { delegate_stateid, file } => {
                enc.u32(CLAIM_DELEGATE_CUR)?;
                delegate_stateid.pack(enc)?;
                enc.string(file)
            }
            Self::DelegatePrev(file) => {
                enc.u32(CLAIM_DELEGATE_PREV)?;
                enc.string(file)
            }
        }
    }
}

/// `createhow4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateHow {
    Unchecked(Fattr),
    Guarded(Fattr),
    Exclusive([u8; NFS4_VERIFIER_SIZE]),
}

impl Pack for CreateHow {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        match self {
            Self::Unchecked(attrs) => {
                enc.u32(UNCHECKED4)?;
                attrs.pack(enc)
            }
            Self::Guarded(attrs) => {
                enc.u32(GUARDED4)?;
                attrs.pack(enc)
            }
            Self::Exclusive(verifier) => {
                enc.u32(EXCLUSIVE4)?;
                enc.pack(verifier)
            }
        }
    }
}

/// `openflag4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenHow {
    NoCreate,
    Create(CreateHow),
}

impl Pack for OpenHow {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        match self {
            Self::NoCreate => enc.u32(OPEN4_NOCREATE),
            Self::Create(how) => {
                enc.u32(OPEN4_CREATE)?;
                how.pack(enc)
            }
        }
    }
}

/// `locker4`: either a first lock taken through an open, or a further lock
/// by an existing lock owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locker {
    New { open_seqid: u32, open_stateid: Stateid, lock_seqid: u32, lock_owner: StateOwner },
    Existing { lock_stateid: Stateid, lock_seqid: u32 },
}

impl Pack for Locker {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        match self {
            Self::New { open_seqid, open_stateid, lock_seqid, lock_owner } => {
                enc.bool(true)?;
                enc.u32(*open_seqid)?;
                open_stateid.pack(enc)?;
                enc.u32(*lock_seqid)?;
                lock_owner.pack(enc)
            }
            Self::Existing { lock_stateid, lock_seqid } => {
                enc.bool(false)?;
                lock_stateid.pack(enc)?;
                enc.u32(*lock_seqid)
            }
        }
    }
}

/// `fattr4`: a bitmap plus the packed values of the set bits, in bit order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fattr {
    pub attrmask: Vec<u32>,
    pub attr_vals: Vec<u8>,
}

impl Pack for Fattr {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.array(&self.attrmask)?;
        enc.opaque(&self.attr_vals)
    }
}

impl Unpack for Fattr {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { attrmask: dec.array()?, attr_vals: dec.opaque()?.to_vec() })
    }
}

/// One `entry4` of a READDIR reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub cookie: u64,
    pub name: String,
    pub attrs: Fattr,
}

impl Pack for DirEntry {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        enc.u64(self.cookie)?;
        enc.string(&self.name)?;
        self.attrs.pack(enc)
    }
}

impl Unpack for DirEntry {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(Self { cookie: dec.u64()?, name: dec.string()?.to_string(), attrs: dec.unpack()? })
    }
}

/// Encodes the `entry4` chain: each entry is preceded by a present flag,
/// and a false flag ends the list.
pub fn pack_entries(enc: &mut Encoder, entries: &[DirEntry]) -> xdrpack::Result<()> {
    for entry in entries {
        enc.bool(true)?;
        entry.pack(enc)?;
    }
    enc.bool(false)
}

pub fn unpack_entries(dec: &mut Decoder<'_>) -> xdrpack::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    while dec.bool()? {
        entries.push(dec.unpack()?);
    }
    Ok(entries)
}

/// `secinfo4`. Only RPCSEC_GSS carries details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Secinfo {
    Flavor(u32),
    Gss { oid: Vec<u8>, qop: u32, service: u32 },
}

impl Pack for Secinfo {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        match self {
            Self::Flavor(flavor) => enc.u32(*flavor),
            Self::Gss { oid, qop, service } => {
                enc.u32(RPCSEC_GSS)?;
                enc.opaque(oid)?;
                enc.u32(*qop)?;
                enc.u32(*service)
            }
        }
    }
}

impl Unpack for Secinfo {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(match dec.u32()? {
            RPCSEC_GSS => Self::Gss { oid: dec.opaque()?.to_vec(), qop: dec.u32()?, service: dec.u32()? },
            flavor => Self::Flavor(flavor),
        })
    }
}

/// `nfs_fh4`.
pub fn unpack_fh(dec: &mut Decoder<'_>) -> xdrpack::Result<Vec<u8>> {
    Ok(dec.opaque_max(NFS4_FHSIZE)?.to_vec())
}
