//! Binary record codec.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! [key_len: u32][key: utf8][val_len: u32][val: utf8][tombstone: u8][timestamp: i64]
//! ```
//!
//! A zero `val_len` together with tombstone byte `0` encodes the *empty*
//! value; the tombstone byte is the sole discriminator between an empty
//! value and a deletion.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Maximum key size we'll allocate during decode (64 KiB). Prevents OOM on
/// corrupt input.
const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size we'll allocate during decode (10 MiB).
const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Errors produced while encoding or decoding records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The byte stream does not hold a well-formed record.
    #[error("corrupt record: {0}")]
    Corrupt(&'static str),
}

use crate::Record;

/// Serializes `record` to `w`.
pub fn encode<W: Write>(w: &mut W, record: &Record) -> Result<(), CodecError> {
    let key = record.key().as_bytes();
    w.write_u32::<BigEndian>(key.len() as u32)?;
    w.write_all(key)?;

    match record.value() {
        Some(v) => {
            let v = v.as_bytes();
            w.write_u32::<BigEndian>(v.len() as u32)?;
            w.write_all(v)?;
        }
        None => w.write_u32::<BigEndian>(0)?,
    }

    w.write_u8(u8::from(record.is_tombstone()))?;
    w.write_i64::<BigEndian>(record.timestamp_ms())?;
    Ok(())
}

/// Deserializes one record from `r`.
///
/// Fails with [`CodecError::Corrupt`] on premature EOF, oversized length
/// fields, an invalid tombstone byte, or non-UTF-8 key/value bytes.
pub fn decode<R: Read>(r: &mut R) -> Result<Record, CodecError> {
    let key_len = read_u32(r)? as usize;
    if key_len == 0 || key_len > MAX_KEY_BYTES {
        return Err(CodecError::Corrupt("bad key length"));
    }
    let key = read_string(r, key_len)?;

    let val_len = read_u32(r)? as usize;
    if val_len > MAX_VALUE_BYTES {
        return Err(CodecError::Corrupt("bad value length"));
    }
    let value = read_string(r, val_len)?;

    let tombstone = match read_u8(r)? {
        0 => false,
        1 => true,
        _ => return Err(CodecError::Corrupt("bad tombstone byte")),
    };
    let timestamp_ms = read_i64(r)?;

    if tombstone {
        if val_len != 0 {
            return Err(CodecError::Corrupt("tombstone with value bytes"));
        }
        Ok(Record::tombstone(key, timestamp_ms))
    } else {
        Ok(Record::put(key, value, timestamp_ms))
    }
}

/// Size in bytes of `record` once encoded.
#[must_use]
pub fn encoded_len(record: &Record) -> u64 {
    let val_len = record.value().map_or(0, str::len);
    4 + record.key().len() as u64 + 4 + val_len as u64 + 1 + 8
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8, CodecError> {
    r.read_u8().map_err(map_eof)
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, CodecError> {
    r.read_u32::<BigEndian>().map_err(map_eof)
}

fn read_i64<R: Read>(r: &mut R) -> Result<i64, CodecError> {
    r.read_i64::<BigEndian>().map_err(map_eof)
}

fn read_string<R: Read>(r: &mut R, len: usize) -> Result<String, CodecError> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(map_eof)?;
    String::from_utf8(buf).map_err(|_| CodecError::Corrupt("invalid utf-8"))
}

fn map_eof(e: io::Error) -> CodecError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::Corrupt("truncated record")
    } else {
        CodecError::Io(e)
    }
}
