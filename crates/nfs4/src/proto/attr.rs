//! # File Attributes
//!
//! The `fattr4` catalog: one static table maps bit numbers to names and value
//! kinds, and `AttrValue` carries decoded values. Conversions between
//! bitmaps, attribute lists and `Fattr` all go through that table.

use std::collections::BTreeMap;

use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;
use xdrpack::Unpack;

use super::consts::NFS4_FHSIZE;
use super::consts::SET_TO_CLIENT_TIME4;
use super::consts::SET_TO_SERVER_TIME4;
use super::types::Fattr;
use super::types::Nfsace;

pub const FATTR4_SUPPORTED_ATTRS: u32 = 0;
pub const FATTR4_TYPE: u32 = 1;
pub const FATTR4_FH_EXPIRE_TYPE: u32 = 2;
pub const FATTR4_CHANGE: u32 = 3;
pub const FATTR4_SIZE: u32 = 4;
pub const FATTR4_FSID: u32 = 8;
pub const FATTR4_LEASE_TIME: u32 = 10;
pub const FATTR4_ACL: u32 = 12;
pub const FATTR4_FILEHANDLE: u32 = 19;
pub const FATTR4_FILEID: u32 = 20;
pub const FATTR4_MODE: u32 = 33;
pub const FATTR4_NUMLINKS: u32 = 35;
pub const FATTR4_OWNER: u32 = 36;
pub const FATTR4_OWNER_GROUP: u32 = 37;
pub const FATTR4_TIME_ACCESS_SET: u32 = 48;
pub const FATTR4_TIME_MODIFY: u32 = 53;
pub const FATTR4_TIME_MODIFY_SET: u32 = 54;

/// Wire shape of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Bitmap,
    U32,
    U64,
    Bool,
    Fsid,
    Handle,
    Text,
    Specdata,
    Time,
    SetTime,
    Acl,
    FsLocations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrDef {
    pub bit: u32,
    pub name: &'static str,
    pub kind: AttrKind,
}

const fn def(bit: u32, name: &'static str, kind: AttrKind) -> AttrDef {
    AttrDef { bit, name, kind }
}

/// Every v4.0 attribute, indexed by bit number.
pub static ATTRIBUTES: &[AttrDef] = &[
    def(0, "supported_attrs", AttrKind::Bitmap),
    def(1, "type", AttrKind::U32),
    def(2, "fh_expire_type", AttrKind::U32),
    def(3, "change", AttrKind::U64),
    def(4, "size", AttrKind::U64),
    def(5, "link_support", AttrKind::Bool),
    def(6, "symlink_support", AttrKind::Bool),
    def(7, "named_attr", AttrKind::Bool),
    def(8, "fsid", AttrKind::Fsid),
    def(9, "unique_handles", AttrKind::Bool),
    def(10, "lease_time", AttrKind::U32),
    def(11, "rdattr_error", AttrKind::U32),
    def(12, "acl", AttrKind::Acl),
    def(13, "aclsupport", AttrKind::U32),
    def(14, "archive", AttrKind::Bool),
    def(15, "cansettime", AttrKind::Bool),
    def(16, "case_insensitive", AttrKind::Bool),
    def(17, "case_preserving", AttrKind::Bool),
    def(18, "chown_restricted", AttrKind::Bool),
    def(19, "filehandle", AttrKind::Handle),
    def(20, "fileid", AttrKind::U64),
    def(21, "files_avail", AttrKind::U64),
    def(22, "files_free", AttrKind::U64),
    def(23, "files_total", AttrKind::U64),
    def(24, "fs_locations", AttrKind::FsLocations),
    def(25, "hidden", AttrKind::Bool),
    def(26, "homogeneous", AttrKind::Bool),
    def(27, "maxfilesize", AttrKind::U64),
    def(28, "maxlink", AttrKind::U32),
    def(29, "maxname", AttrKind::U32),
    def(30, "maxread", AttrKind::U64),
    def(31, "maxwrite", AttrKind::U64),
    def(32, "mimetype", AttrKind::Text),
    def(33, "mode", AttrKind::U32),
    def(34, "no_trunc", AttrKind::Bool),
    def(35, "numlinks", AttrKind::U32),
    def(36, "owner", AttrKind::Text),
    def(37, "owner_group", AttrKind::Text),
    def(38, "quota_avail_hard", AttrKind::U64),
    def(39, "quota_avail_soft", AttrKind::U64),
    def(40, "quota_used", AttrKind::U64),
    def(41, "rawdev", AttrKind::Specdata),
    def(42, "space_avail", AttrKind::U64),
    def(43, "space_free", AttrKind::U64),
    def(44, "space_total", AttrKind::U64),
    def(45, "space_used", AttrKind::U64),
    def(46, "system", AttrKind::Bool),
    def(47, "time_access", AttrKind::Time),
    def(48, "time_access_set", AttrKind::SetTime),
    def(49, "time_backup", AttrKind::Time),
    def(50, "time_create", AttrKind::Time),
    def(51, "time_delta", AttrKind::Time),
    def(52, "time_metadata", AttrKind::Time),
    def(53, "time_modify", AttrKind::Time),
    def(54, "time_modify_set", AttrKind::SetTime),
    def(55, "mounted_on_fileid", AttrKind::U64),
];

pub fn lookup(bit: u32) -> Option<&'static AttrDef> {
    ATTRIBUTES.get(bit as usize)
}

pub fn attr_name(bit: u32) -> Option<&'static str> {
    lookup(bit).map(|def| def.name)
}

pub fn attr_bit(name: &str) -> Option<u32> {
    ATTRIBUTES.iter().find(|def| def.name == name).map(|def| def.bit)
}

/// `nfstime4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NfsTime {
    pub seconds: i64,
    pub nseconds: u32,
}

/// `fs_locations4`, with pathnames as component lists.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FsLocations {
    pub root: Vec<String>,
    pub locations: Vec<FsLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FsLocation {
    pub servers: Vec<String>,
    pub rootpath: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Bitmap(Vec<u32>),
    U32(u32),
    U64(u64),
    Bool(bool),
    Fsid { major: u64, minor: u64 },
    Handle(Vec<u8>),
    Text(String),
    Specdata(u32, u32),
    Time(NfsTime),
    /// `None` asks the server to use its own clock.
    SetTime(Option<NfsTime>),
    Acl(Vec<Nfsace>),
    FsLocations(FsLocations),
}

impl AttrValue {
    pub fn kind(&self) -> AttrKind {
        match self {
            Self::Bitmap(_) => AttrKind::Bitmap,
            Self::U32(_) => AttrKind::U32,
            Self::U64(_) => AttrKind::U64,
            Self::Bool(_) => AttrKind::Bool,
            Self::Fsid { .. } => AttrKind::Fsid,
            Self::Handle(_) => AttrKind::Handle,
            Self::Text(_) => AttrKind::Text,
            Self::Specdata(..) => AttrKind::Specdata,
            Self::Time(_) => AttrKind::Time,
            Self::SetTime(_) => AttrKind::SetTime,
            Self::Acl(_) => AttrKind::Acl,
            Self::FsLocations(_) => AttrKind::FsLocations,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    fn pack_value(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        match self {
            Self::Bitmap(mask) => enc.array(mask),
            Self::U32(v) => enc.u32(*v),
            Self::U64(v) => enc.u64(*v),
            Self::Bool(v) => enc.bool(*v),
            Self::Fsid { major, minor } => {
                enc.u64(*major)?;
                enc.u64(*minor)
            }
            Self::Handle(fh) => enc.opaque(fh),
            Self::Text(text) => enc.string(text),
            Self::Specdata(major, minor) => {
                enc.u32(*major)?;
                enc.u32(*minor)
            }
            Self::Time(time) => pack_time(enc, time),
            Self::SetTime(None) => enc.u32(SET_TO_SERVER_TIME4),
            Self::SetTime(Some(time)) => {
                enc.u32(SET_TO_CLIENT_TIME4)?;
                pack_time(enc, time)
            }
            Self::Acl(aces) => enc.array(aces),
            Self::FsLocations(locations) => {
                enc.array(&locations.root)?;
                enc.u32(locations.locations.len() as u32)?;
                for location in &locations.locations {
                    enc.array(&location.servers)?;
                    enc.array(&location.rootpath)?;
                }
                Ok(())
            }
        }
    }

    fn unpack_value(kind: AttrKind, dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        Ok(match kind {
            AttrKind::Bitmap => Self::Bitmap(dec.array()?),
            AttrKind::U32 => Self::U32(dec.u32()?),
            AttrKind::U64 => Self::U64(dec.u64()?),
            AttrKind::Bool => Self::Bool(dec.bool()?),
            AttrKind::Fsid => Self::Fsid { major: dec.u64()?, minor: dec.u64()? },
            AttrKind::Handle => Self::Handle(dec.opaque_max(NFS4_FHSIZE)?.to_vec()),
            AttrKind::Text => Self::Text(dec.unpack()?),
            AttrKind::Specdata => Self::Specdata(dec.u32()?, dec.u32()?),
            AttrKind::Time => Self::Time(unpack_time(dec)?),
            AttrKind::SetTime => match dec.u32()? {
                SET_TO_SERVER_TIME4 => Self::SetTime(None),
                SET_TO_CLIENT_TIME4 => Self::SetTime(Some(unpack_time(dec)?)),
                value => return Err(xdrpack::Error::InvalidDiscriminant { type_name: "time_how4", value }),
            },
            AttrKind::Acl => Self::Acl(dec.array()?),
            AttrKind::FsLocations => {
                let root = dec.array()?;
                let count = dec.u32()?;
                let mut locations = Vec::new();
                for _ in 0..count {
                    locations.push(FsLocation { servers: dec.array()?, rootpath: dec.array()? });
                }
                Self::FsLocations(FsLocations { root, locations })
            }
        })
    }
}

fn pack_time(enc: &mut Encoder, time: &NfsTime) -> xdrpack::Result<()> {
    enc.i64(time.seconds)?;
    enc.u32(time.nseconds)
}

fn unpack_time(dec: &mut Decoder<'_>) -> xdrpack::Result<NfsTime> {
    Ok(NfsTime { seconds: dec.i64()?, nseconds: dec.u32()? })
}

/// Builds a `bitmap4` from attribute bit numbers.
pub fn list_to_mask(bits: &[u32]) -> Vec<u32> {
    let mut mask = Vec::new();
    for &bit in bits {
        let word = (bit / 32) as usize;
        if mask.len() <= word {
            mask.resize(word + 1, 0);
        }
        mask[word] |= 1u32 << (bit % 32);
    }
    mask
}

/// Lists the bits set in a `bitmap4`, in ascending order.
pub fn mask_to_list(mask: &[u32]) -> Vec<u32> {
    let mut bits = Vec::new();
    for (word, value) in mask.iter().enumerate() {
        for bit in 0..32 {
            if value & (1u32 << bit) != 0 {
                bits.push(word as u32 * 32 + bit);
            }
        }
    }
    bits
}

fn unknown_attr(bit: u32) -> xdrpack::Error {
    xdrpack::Error::InvalidDiscriminant { type_name: "fattr4 attribute", value: bit }
}

/// Packs typed values into an `Fattr`. Values must match their table kind.
pub fn encode_fattr(values: &BTreeMap<u32, AttrValue>) -> xdrpack::Result<Fattr> {
    let mut enc = Encoder::new();
    for (&bit, value) in values {
        let def = lookup(bit).ok_or_else(|| unknown_attr(bit))?;
        if def.kind != value.kind() {
            return Err(unknown_attr(bit));
        }
        value.pack_value(&mut enc)?;
    }
    let bits: Vec<u32> = values.keys().copied().collect();
    Ok(Fattr { attrmask: list_to_mask(&bits), attr_vals: enc.into_bytes() })
}

/// Unpacks every value in an `Fattr`; the value bytes must be consumed exactly.
pub fn decode_fattr(fattr: &Fattr) -> xdrpack::Result<BTreeMap<u32, AttrValue>> {
    let mut dec = Decoder::new(&fattr.attr_vals);
    let mut values = BTreeMap::new();
    for bit in mask_to_list(&fattr.attrmask) {
        let def = lookup(bit).ok_or_else(|| unknown_attr(bit))?;
        values.insert(bit, AttrValue::unpack_value(def.kind, &mut dec)?);
    }
    dec.done()?;
    Ok(values)
}

impl Fattr {
    pub fn from_values(values: &BTreeMap<u32, AttrValue>) -> xdrpack::Result<Self> {
        encode_fattr(values)
    }

    pub fn values(&self) -> xdrpack::Result<BTreeMap<u32, AttrValue>> {
        decode_fattr(self)
    }

    /// Keeps only the attributes also set in `request`.
    pub fn subset(&self, request: &[u32]) -> xdrpack::Result<Fattr> {
        let wanted = mask_to_list(request);
        let mut values = self.values()?;
        values.retain(|bit, _| wanted.contains(bit));
        encode_fattr(&values)
    }
}

impl Pack for NfsTime {
    fn pack(&self, enc: &mut Encoder) -> xdrpack::Result<()> {
        pack_time(enc, self)
    }
}

impl Unpack for NfsTime {
    fn unpack(dec: &mut Decoder<'_>) -> xdrpack::Result<Self> {
        unpack_time(dec)
    }
}
