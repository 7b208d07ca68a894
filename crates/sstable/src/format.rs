//! Run-file trailer encoding and file naming.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::RunError;

/// Run files are named `run_<zero-padded-id>.dat`.
pub const RUN_FILE_PREFIX: &str = "run_";
pub const RUN_FILE_SUFFIX: &str = ".dat";

/// Smallest possible footer: zero-length min/max keys.
const MIN_FOOTER_BYTES: u64 = 4 + 4 + 4 + 8;
/// index_offset (8) + trailing footer_len (4).
const TRAILER_FIXED_BYTES: u64 = 8 + 4;

/// Guard against absurd footer lengths from corrupt files (keys are capped
/// at 64 KiB each by the codec).
const MAX_FOOTER_BYTES: u64 = MIN_FOOTER_BYTES + 2 * 64 * 1024;

#[must_use]
pub fn run_file_name(id: u64) -> String {
    format!("{RUN_FILE_PREFIX}{id:06}{RUN_FILE_SUFFIX}")
}

/// Extracts the numeric id from a `run_<NNNNNN>.dat` file name.
#[must_use]
pub fn parse_run_file_id(name: &str) -> Option<u64> {
    name.strip_prefix(RUN_FILE_PREFIX)?
        .strip_suffix(RUN_FILE_SUFFIX)?
        .parse()
        .ok()
}

/// Descriptor of a published run, as tracked by the [`crate::Catalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMeta {
    pub path: PathBuf,
    pub file_id: u64,
    pub min_key: String,
    pub max_key: String,
    pub entry_count: u32,
    pub file_size: u64,
    pub created_ms: i64,
}

impl RunMeta {
    /// `true` if `key` falls inside this run's `[min, max]` key bounds.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entry_count > 0 && self.min_key.as_str() <= key && key <= self.max_key.as_str()
    }

    /// File name for log messages.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<run>")
    }
}

/// The footer fields written between `index_offset` and the trailing
/// `footer_len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub entry_count: u32,
    pub min_key: String,
    pub max_key: String,
    pub created_ms: i64,
}

impl Footer {
    /// Writes the footer fields, returning their length in bytes (the value
    /// the trailing `footer_len` field must carry).
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<u32> {
        w.write_u32::<BigEndian>(self.entry_count)?;
        w.write_u32::<BigEndian>(self.min_key.len() as u32)?;
        w.write_all(self.min_key.as_bytes())?;
        w.write_u32::<BigEndian>(self.max_key.len() as u32)?;
        w.write_all(self.max_key.as_bytes())?;
        w.write_i64::<BigEndian>(self.created_ms)?;
        Ok((MIN_FOOTER_BYTES as usize + self.min_key.len() + self.max_key.len()) as u32)
    }
}

/// Everything a reader learns from the tail of a run file.
#[derive(Debug)]
pub struct Trailer {
    pub footer: Footer,
    /// Byte offset where the index section starts (== data section length).
    pub index_offset: u64,
    /// Byte offset one past the end of the index section.
    pub index_end: u64,
}

/// Reads the trailer from the tail of an open run file.
///
/// Seeks to the last 4 bytes for `footer_len`, back `footer_len + 4` for
/// the footer fields, and a further 8 bytes for `index_offset`.
pub fn read_trailer(file: &mut File) -> Result<Trailer, RunError> {
    let file_size = file.seek(SeekFrom::End(0))?;
    if file_size < MIN_FOOTER_BYTES + TRAILER_FIXED_BYTES {
        return Err(RunError::Corrupt("file too small for trailer".into()));
    }

    file.seek(SeekFrom::End(-4))?;
    let footer_len = u64::from(file.read_u32::<BigEndian>()?);
    if footer_len < MIN_FOOTER_BYTES
        || footer_len > MAX_FOOTER_BYTES
        || footer_len + TRAILER_FIXED_BYTES > file_size
    {
        return Err(RunError::Corrupt(format!("bad footer length {footer_len}")));
    }

    let footer_start = file_size - 4 - footer_len;
    file.seek(SeekFrom::Start(footer_start))?;
    let entry_count = file.read_u32::<BigEndian>()?;
    let min_key = read_key(file, footer_len)?;
    let max_key = read_key(file, footer_len)?;
    let created_ms = file.read_i64::<BigEndian>()?;

    let index_end = footer_start - 8;
    file.seek(SeekFrom::Start(index_end))?;
    let index_offset = file.read_i64::<BigEndian>()?;
    if index_offset < 0 || index_offset as u64 > index_end {
        return Err(RunError::Corrupt(format!("bad index offset {index_offset}")));
    }

    Ok(Trailer {
        footer: Footer {
            entry_count,
            min_key,
            max_key,
            created_ms,
        },
        index_offset: index_offset as u64,
        index_end,
    })
}

fn read_key(file: &mut File, footer_len: u64) -> Result<String, RunError> {
    let len = u64::from(file.read_u32::<BigEndian>()?);
    if len > footer_len {
        return Err(RunError::Corrupt(format!("bad footer key length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| RunError::Corrupt("footer key is not utf-8".into()))
}

/// Builds a [`RunMeta`] for a finished file at `path`.
pub(crate) fn meta_for(path: &Path, footer: &Footer, file_size: u64) -> RunMeta {
    let file_id = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_run_file_id)
        .unwrap_or(0);
    RunMeta {
        path: path.to_path_buf(),
        file_id,
        min_key: footer.min_key.clone(),
        max_key: footer.max_key.clone(),
        entry_count: footer.entry_count,
        file_size,
        created_ms: footer.created_ms,
    }
}
