//! # WAL - write-ahead recovery log
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary record
//! and appended to the log **before** the corresponding in-memory update.
//! On restart the log is replayed to reconstruct the memtable, so no
//! acknowledged write is lost. After a successful flush the log is
//! truncated; everything it held is now safe in a run file.
//!
//! ## Binary record format
//!
//! ```text
//! [kind: u8][sequence: i64][timestamp: i64][key_len: u32][key][val_len: u32][val]
//! ```
//!
//! All integers big-endian. `kind` is `1` for PUT, `2` for DELETE;
//! `val_len` is `0` for DELETE. The sequence number increases
//! monotonically across truncations. It is preserved for observability,
//! not required for recovery ordering (timestamps are).
//!
//! ## Durability
//!
//! Appends land in the OS page cache before the call returns; `fsync` is
//! deferred up to the configured sync interval. A crash inside that window
//! loses only the un-synced suffix. A sync interval of `0` forces fsync on
//! every append.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use record::Clock;
use thiserror::Error;
use tracing::warn;

const KIND_PUT: u8 = 1;
const KIND_DELETE: u8 = 2;

/// Same decode caps as the record codec.
const MAX_KEY_BYTES: usize = 64 * 1024;
const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Errors surfaced by log operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed to decode (truncated tail, bad kind byte, bad
    /// UTF-8).
    #[error("corrupt log record")]
    Corrupt,

    /// Append or sync on a closed log.
    #[error("log is closed")]
    Closed,
}

/// The kind of mutation a log record captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalKind {
    Put,
    Delete,
}

/// One recovered or appended log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub kind: WalKind,
    pub seq: u64,
    pub timestamp_ms: i64,
    pub key: String,
    /// `None` for DELETE records.
    pub value: Option<String>,
}

/// Append-only write-ahead log over a single file.
///
/// Not itself thread-safe; the engine serializes appends behind its own
/// mutex.
pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
    seq: u64,
    sync_interval: Duration,
    last_sync: Instant,
    clock: Arc<Clock>,
    closed: bool,
    /// Reusable scratch buffer so appends don't allocate.
    buf: Vec<u8>,
}

impl Wal {
    /// Opens (or creates) the log at `path` for appending, creating parent
    /// directories as needed.
    ///
    /// If the file already holds records, they are scanned once to seed
    /// the sequence counter past the highest value observed.
    pub fn open<P: AsRef<Path>>(
        path: P,
        sync_interval_ms: u64,
        clock: Arc<Clock>,
    ) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let seq = match fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => read_records(&path)?
                .iter()
                .map(|r| r.seq)
                .max()
                .unwrap_or(0),
            _ => 0,
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            seq,
            sync_interval: Duration::from_millis(sync_interval_ms),
            last_sync: Instant::now(),
            clock,
            closed: false,
            buf: Vec::with_capacity(256),
        })
    }

    /// Logs a PUT, returning the assigned sequence number.
    pub fn log_put(&mut self, key: &str, value: &str) -> Result<u64, WalError> {
        self.append(KIND_PUT, key, Some(value))
    }

    /// Logs a DELETE, returning the assigned sequence number.
    pub fn log_delete(&mut self, key: &str) -> Result<u64, WalError> {
        self.append(KIND_DELETE, key, None)
    }

    fn append(&mut self, kind: u8, key: &str, value: Option<&str>) -> Result<u64, WalError> {
        if self.closed {
            return Err(WalError::Closed);
        }

        self.seq += 1;
        let seq = self.seq;
        let timestamp_ms = self.clock.now_ms();

        self.buf.clear();
        self.buf.write_u8(kind)?;
        self.buf.write_i64::<BigEndian>(seq as i64)?;
        self.buf.write_i64::<BigEndian>(timestamp_ms)?;
        self.buf.write_u32::<BigEndian>(key.len() as u32)?;
        self.buf.extend_from_slice(key.as_bytes());
        match value {
            Some(v) => {
                self.buf.write_u32::<BigEndian>(v.len() as u32)?;
                self.buf.extend_from_slice(v.as_bytes());
            }
            None => self.buf.write_u32::<BigEndian>(0)?,
        }

        self.writer.write_all(&self.buf)?;
        self.writer.flush()?;

        if self.last_sync.elapsed() >= self.sync_interval {
            self.writer.get_ref().sync_all()?;
            self.last_sync = Instant::now();
        }
        Ok(seq)
    }

    /// Flushes buffers and fsyncs the file descriptor.
    pub fn sync(&mut self) -> Result<(), WalError> {
        if self.closed {
            return Err(WalError::Closed);
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Reads every intact record from the log file.
    ///
    /// A corrupt or truncated tail (e.g. from a crash mid-append) stops
    /// the read; all records before it are returned and the damaged suffix
    /// is discarded on the next truncation.
    pub fn recover(&self) -> Result<Vec<WalRecord>, WalError> {
        read_records(&self.path)
    }

    /// Deletes the log file and reopens an empty one. Invoked after a
    /// successful flush. The sequence counter is NOT reset; it keeps
    /// growing across truncations.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Final sync; further appends fail with [`WalError::Closed`].
    pub fn close(&mut self) -> Result<(), WalError> {
        if self.closed {
            return Ok(());
        }
        self.sync()?;
        self.closed = true;
        Ok(())
    }

    /// Highest sequence number assigned so far.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> Result<u64, WalError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads records from `path` until EOF or the first corrupt record
/// (tail-truncation policy).
fn read_records(path: &Path) -> Result<Vec<WalRecord>, WalError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();

    loop {
        match read_record(&mut reader) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => break,
            Err(WalError::Corrupt) => {
                warn!(
                    path = %path.display(),
                    recovered = records.len(),
                    "corrupt log record, truncating tail"
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

/// Decodes one record. `Ok(None)` means a clean EOF at a record boundary;
/// EOF anywhere inside a record is `Corrupt`.
fn read_record<R: Read>(r: &mut R) -> Result<Option<WalRecord>, WalError> {
    let kind = match r.read_u8() {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let kind = match kind {
        KIND_PUT => WalKind::Put,
        KIND_DELETE => WalKind::Delete,
        _ => return Err(WalError::Corrupt),
    };

    let seq = read_i64(r)? as u64;
    let timestamp_ms = read_i64(r)?;

    let key_len = read_u32(r)? as usize;
    if key_len == 0 || key_len > MAX_KEY_BYTES {
        return Err(WalError::Corrupt);
    }
    let key = read_string(r, key_len)?;

    let val_len = read_u32(r)? as usize;
    if val_len > MAX_VALUE_BYTES {
        return Err(WalError::Corrupt);
    }
    let value = match kind {
        WalKind::Put => Some(read_string(r, val_len)?),
        WalKind::Delete => {
            if val_len != 0 {
                return Err(WalError::Corrupt);
            }
            None
        }
    };

    Ok(Some(WalRecord {
        kind,
        seq,
        timestamp_ms,
        key,
        value,
    }))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, WalError> {
    r.read_u32::<BigEndian>().map_err(map_eof)
}

fn read_i64<R: Read>(r: &mut R) -> Result<i64, WalError> {
    r.read_i64::<BigEndian>().map_err(map_eof)
}

fn read_string<R: Read>(r: &mut R, len: usize) -> Result<String, WalError> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(map_eof)?;
    String::from_utf8(buf).map_err(|_| WalError::Corrupt)
}

fn map_eof(e: io::Error) -> WalError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        WalError::Corrupt
    } else {
        WalError::Io(e)
    }
}
