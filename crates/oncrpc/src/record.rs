//! # Record Marking
//!
//! RPC messages on a stream are split into fragments, each preceded by a
//! 4-byte big-endian mark. The top bit of the mark flags the last fragment of
//! a record; the low 31 bits carry the fragment length.

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::error::TransportError;

pub const LAST_FRAGMENT: u32 = 0x8000_0000;
pub const MAX_FRAGMENT: usize = 0x7fff_ffff;
pub const DEFAULT_CHUNK_SIZE: usize = 2048;
pub const DEFAULT_MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Frames `payload` as one record of fragments no longer than `chunk_size`.
///
/// An empty payload becomes a single empty last fragment.
pub fn encode_record(payload: &[u8], chunk_size: usize) -> Vec<u8> {
    let chunk_size = chunk_size.clamp(1, MAX_FRAGMENT);
    let fragments = payload.len().div_ceil(chunk_size).max(1);
    let mut out = Vec::with_capacity(payload.len() + 4 * fragments);

    if payload.is_empty() {
        out.extend_from_slice(&LAST_FRAGMENT.to_be_bytes());
        return out;
    }

    let mut chunks = payload.chunks(chunk_size).peekable();
    while let Some(chunk) = chunks.next() {
        let mut mark = chunk.len() as u32;
        if chunks.peek().is_none() {
            mark |= LAST_FRAGMENT;
        }
        out.extend_from_slice(&mark.to_be_bytes());
        out.extend_from_slice(chunk);
    }
    out
}

/// Reassembles one record from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete record,
/// otherwise the payload and the number of bytes consumed.
pub fn decode_record(buf: &[u8], max: usize) -> Result<Option<(Vec<u8>, usize)>, TransportError> {
    let mut pos = 0;
    let mut payload = Vec::new();
    loop {
        let Some(mark) = buf.get(pos..pos + 4) else {
            return Ok(None);
        };
        let mark = u32::from_be_bytes([mark[0], mark[1], mark[2], mark[3]]);
        let len = (mark & !LAST_FRAGMENT) as usize;
        if payload.len() + len > max {
            return Err(TransportError::RecordTooLarge { len: payload.len() + len, max });
        }
        let Some(body) = buf.get(pos + 4..pos + 4 + len) else {
            return Ok(None);
        };
        payload.extend_from_slice(body);
        pos += 4 + len;
        if mark & LAST_FRAGMENT != 0 {
            return Ok(Some((payload, pos)));
        }
    }
}

/// Writes one record and flushes.
pub async fn write_record<W>(writer: &mut W, payload: &[u8], chunk_size: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let framed = encode_record(payload, chunk_size);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads fragments until the last one and returns the reassembled record.
pub async fn read_record<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut payload = Vec::new();
    loop {
        let mut mark = [0u8; 4];
        reader.read_exact(&mut mark).await?;
        let mark = u32::from_be_bytes(mark);
        let len = (mark & !LAST_FRAGMENT) as usize;
        if payload.len() + len > max {
            return Err(TransportError::RecordTooLarge { len: payload.len() + len, max });
        }
        let start = payload.len();
        payload.resize(start + len, 0);
        reader.read_exact(&mut payload[start..]).await?;
        if mark & LAST_FRAGMENT != 0 {
            return Ok(payload);
        }
    }
}
