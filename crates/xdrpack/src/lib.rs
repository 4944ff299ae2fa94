//! # xdrpack
//!
//! A distinctively small, strict cursor codec for XDR (RFC 4506).
//!
//! ## Philosophy
//!
//! - **Explicit cursors**: `Encoder` appends to an owned buffer, `Decoder` is a
//!   zero-copy, bounds-checked view with an explicit position.
//! - **Strict**: padding must be zero, booleans must be 0 or 1, and
//!   `Decoder::done` rejects trailing bytes.
//! - **Typed edges**: `Pack`/`Unpack` let protocol crates describe their
//!   structures once and reuse them on both sides of the wire.
//!
//! ## Format
//!
//! - **Scalars**: 4-byte (`u32`, `i32`, `bool`, enums) or 8-byte (`u64`, `i64`) words.
//! - **Opaque/strings**: `[Len: 4b][Data: Len][Pad: 0-3]`.
//! - **Fixed opaque**: `[Data: N][Pad: 0-3]`.
//! - **Arrays**: `[Count: 4b][Item]*`.
//!
//! All integers are Big-Endian.


/// XDR serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd { needed: usize, remaining: usize },
    /// `done()` found unread bytes after the last item.
    TrailingBytes(usize),
    /// A boolean word was neither 0 nor 1.
    InvalidBool(u32),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A declared length exceeds its bound or the bytes left in the buffer.
    LengthTooLarge { len: usize, max: usize },
    /// A union discriminant or enum value is not defined for the type.
    InvalidDiscriminant { type_name: &'static str, value: u32 },
    /// Padding after opaque data was not zero.
    NonZeroPadding,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd { needed, remaining } => {
                write!(f, "Unexpected end of buffer: needed {} bytes, {} remaining", needed, remaining)
            }
            Error::TrailingBytes(n) => write!(f, "{} unexpected trailing bytes", n),
            Error::InvalidBool(v) => write!(f, "Invalid boolean word: {}", v),
            Error::LengthTooLarge { len, max } => write!(f, "Length {} exceeds maximum {}", len, max),
            Error::InvalidDiscriminant { type_name, value } => {
                write!(f, "Invalid discriminant {} for {}", value, type_name)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for xdrpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Number of zero bytes needed to pad `len` to a 4-byte boundary.
#[inline]
pub fn padding(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// A value that knows how to write itself as XDR.
pub trait Pack {
    fn pack(&self, enc: &mut Encoder) -> Result<()>;
}

/// A value that knows how to read itself from XDR.
pub trait Unpack: Sized {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self>;
}

/// Encodes a single value into a fresh buffer.
pub fn to_bytes<T: Pack + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    value.pack(&mut enc)?;
    Ok(enc.into_bytes())
}

/// Decodes a single value and requires that it consumes the whole buffer.
pub fn from_bytes<T: Unpack>(bytes: &[u8]) -> Result<T> {
    let mut dec = Decoder::new(bytes);
    let value = T::unpack(&mut dec)?;
    dec.done()?;
    Ok(value)
}

/// An append-only XDR writer.
///
/// The encoder never looks back at what it has written; lengths are known up
/// front in XDR, so there is nothing to back-patch.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder with default capacity.
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(1024) }
    }

    /// Creates an encoder with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    /// Consumes the encoder and returns the final byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns a view of everything written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Drops everything written, keeping the allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn check_len(len: usize) -> Result<u32> {
        u32::try_from(len).map_err(|_| Error::LengthTooLarge { len, max: u32::MAX as usize })
    }

    fn pad(&mut self, len: usize) {
        let pad = padding(len);
        self.buf.extend_from_slice(&[0u8; 3][..pad]);
    }

    /// Encodes an unsigned 32-bit integer.
    pub fn u32(&mut self, v: u32) -> Result<()> { self.buf.extend_from_slice(&v.to_be_bytes()); Ok(()) }
    /// Encodes a signed 32-bit integer.
    pub fn i32(&mut self, v: i32) -> Result<()> { self.buf.extend_from_slice(&v.to_be_bytes()); Ok(()) }
    /// Encodes an unsigned 64-bit integer (hyper).
    pub fn u64(&mut self, v: u64) -> Result<()> { self.buf.extend_from_slice(&v.to_be_bytes()); Ok(()) }
    /// Encodes a signed 64-bit integer (hyper).
    pub fn i64(&mut self, v: i64) -> Result<()> { self.buf.extend_from_slice(&v.to_be_bytes()); Ok(()) }

    /// Encodes a boolean as a 4-byte word.
    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.u32(u32::from(v))
    }

    /// Encodes fixed-length opaque data (no length prefix, padded).
    pub fn opaque_fixed(&mut self, v: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(v);
        self.pad(v.len());
        Ok(())
    }

    /// Encodes variable-length opaque data.
    pub fn opaque(&mut self, v: &[u8]) -> Result<()> {
        let len = Self::check_len(v.len())?;
        self.u32(len)?;
        self.opaque_fixed(v)
    }

    /// Encodes a string (same layout as variable-length opaque).
    pub fn string(&mut self, v: &str) -> Result<()> {
        self.opaque(v.as_bytes())
    }

    /// Encodes any `Pack` value.
    pub fn pack<T: Pack + ?Sized>(&mut self, v: &T) -> Result<()> {
        v.pack(self)
    }

    /// Encodes a counted array.
    pub fn array<T: Pack>(&mut self, items: &[T]) -> Result<()> {
        let len = Self::check_len(items.len())?;
        self.u32(len)?;
        for item in items {
            item.pack(self)?;
        }
        Ok(())
    }

    /// Encodes an XDR optional (`*T`).
    pub fn optional<T: Pack>(&mut self, v: Option<&T>) -> Result<()> {
        match v {
            Some(inner) => {
                self.bool(true)?;
                inner.pack(self)
            }
            None => self.bool(false),
        }
    }

    /// Appends bytes that are already XDR-encoded.
    pub fn raw(&mut self, v: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(v);
        Ok(())
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the cursor. Borrowed results (`opaque`, `string`) point
/// into the original buffer.
///
/// # Errors
/// All read operations return `Error::UnexpectedEnd` if the buffer is exhausted.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fails with `TrailingBytes` unless the whole buffer has been consumed.
    pub fn done(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    /// Returns every unread byte and moves the cursor to the end.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::UnexpectedEnd { needed: n, remaining });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn skip_padding(&mut self, len: usize) -> Result<()> {
        let pad = self.read_bytes(padding(len))?;
        if pad.iter().any(|b| *b != 0) {
            return Err(Error::NonZeroPadding);
        }
        Ok(())
    }

    fn read_len(&mut self, max: usize) -> Result<usize> {
        let len = self.u32()? as usize;
        let bound = max.min(self.remaining());
        if len > bound {
            return Err(Error::LengthTooLarge { len, max: bound });
        }
        Ok(len)
    }

    /// Decodes an unsigned 32-bit integer.
    pub fn u32(&mut self) -> Result<u32> { Ok(u32::from_be_bytes(self.read_array()?)) }
    /// Decodes a signed 32-bit integer.
    pub fn i32(&mut self) -> Result<i32> { Ok(i32::from_be_bytes(self.read_array()?)) }
    /// Decodes an unsigned hyper.
    pub fn u64(&mut self) -> Result<u64> { Ok(u64::from_be_bytes(self.read_array()?)) }
    /// Decodes a signed hyper.
    pub fn i64(&mut self) -> Result<i64> { Ok(i64::from_be_bytes(self.read_array()?)) }

    /// Decodes a boolean; any word other than 0 or 1 is an error.
    pub fn bool(&mut self) -> Result<bool> {
        match self.u32()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(Error::InvalidBool(v)),
        }
    }

    /// Decodes `n` bytes of fixed-length opaque data.
    pub fn opaque_fixed(&mut self, n: usize) -> Result<&'a [u8]> {
        let data = self.read_bytes(n)?;
        self.skip_padding(n)?;
        Ok(data)
    }

    /// Decodes variable-length opaque data of any length.
    pub fn opaque(&mut self) -> Result<&'a [u8]> {
        self.opaque_max(u32::MAX as usize)
    }

    /// Decodes variable-length opaque data no longer than `max`.
    pub fn opaque_max(&mut self, max: usize) -> Result<&'a [u8]> {
        let len = self.read_len(max)?;
        self.opaque_fixed(len)
    }

    /// Decodes a UTF-8 string.
    pub fn string(&mut self) -> Result<&'a str> {
        self.string_max(u32::MAX as usize)
    }

    /// Decodes a UTF-8 string no longer than `max` bytes.
    pub fn string_max(&mut self, max: usize) -> Result<&'a str> {
        let bytes = self.opaque_max(max)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes any `Unpack` value.
    pub fn unpack<T: Unpack>(&mut self) -> Result<T> {
        T::unpack(self)
    }

    /// Decodes a counted array.
    ///
    /// The declared count is checked against the unread bytes before
    /// allocating, so a hostile count cannot force a huge allocation.
    pub fn array<T: Unpack>(&mut self) -> Result<Vec<T>> {
        self.array_max(u32::MAX as usize)
    }

    /// Decodes a counted array with at most `max` elements.
    pub fn array_max<T: Unpack>(&mut self, max: usize) -> Result<Vec<T>> {
        let count = self.read_len(max)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::unpack(self)?);
        }
        Ok(items)
    }

    /// Decodes an XDR optional (`*T`).
    pub fn optional<T: Unpack>(&mut self) -> Result<Option<T>> {
        if self.bool()? {
            Ok(Some(T::unpack(self)?))
        } else {
            Ok(None)
        }
    }
}

impl Pack for u32 {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.u32(*self) }
}

impl Unpack for u32 {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.u32() }
}

impl Pack for i32 {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.i32(*self) }
}

impl Unpack for i32 {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.i32() }
}

impl Pack for u64 {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.u64(*self) }
}

impl Unpack for u64 {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.u64() }
}

impl Pack for i64 {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.i64(*self) }
}

impl Unpack for i64 {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.i64() }
}

impl Pack for bool {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.bool(*self) }
}

impl Unpack for bool {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.bool() }
}

impl Pack for str {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.string(self) }
}

impl Pack for String {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.string(self) }
}

impl Unpack for String {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { Ok(dec.string()?.to_string()) }
}

/// Fixed-length opaque data, e.g. `opaque verifier[8]`.
impl<const N: usize> Pack for [u8; N] {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.opaque_fixed(self) }
}

impl<const N: usize> Unpack for [u8; N] {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut out = [0u8; N];
        out.copy_from_slice(dec.opaque_fixed(N)?);
        Ok(out)
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.optional(self.as_ref()) }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.optional() }
}
