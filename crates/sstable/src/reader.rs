use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use record::{codec, Record};

use crate::format::{self, RunMeta};
use crate::RunError;

/// Reads a run file for point lookups and forward iteration.
///
/// [`open`](RunReader::open) parses the trailer once and loads the entire
/// index into memory as an ascending `(key, offset)` vector. A persistent
/// file handle is kept for point lookups, wrapped in a `Mutex` so `get`
/// works through a shared `&self`; iterators open their own handle so a
/// long scan never starves point reads.
pub struct RunReader {
    path: PathBuf,
    meta: RunMeta,
    index: Vec<(String, u64)>,
    /// Length of the data section (== index offset).
    data_len: u64,
    file: Mutex<BufReader<File>>,
}

impl RunReader {
    /// Opens a run file, reading its trailer and index.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RunError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        let trailer = format::read_trailer(&mut file)?;
        let meta = format::meta_for(&path, &trailer.footer, file_size);

        file.seek(SeekFrom::Start(trailer.index_offset))?;
        let mut index = Vec::with_capacity(meta.entry_count as usize);
        let mut reader = BufReader::new(file);
        let mut pos = trailer.index_offset;
        while pos < trailer.index_end {
            let key_len = u64::from(reader.read_u32::<BigEndian>()?);
            if pos + 4 + key_len + 8 > trailer.index_end {
                return Err(RunError::Corrupt("index entry overruns section".into()));
            }
            let mut key = vec![0u8; key_len as usize];
            reader.read_exact(&mut key)?;
            let key = String::from_utf8(key)
                .map_err(|_| RunError::Corrupt("index key is not utf-8".into()))?;
            let offset = reader.read_i64::<BigEndian>()?;
            if offset < 0 || offset as u64 >= trailer.index_offset {
                return Err(RunError::Corrupt(format!("bad index entry offset {offset}")));
            }
            index.push((key, offset as u64));
            pos += 4 + key_len + 8;
        }

        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            path,
            meta,
            index,
            data_len: trailer.index_offset,
            file: Mutex::new(reader),
        })
    }

    #[must_use]
    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Point lookup for `key`.
    ///
    /// Binary-searches the index for the greatest entry whose key is `<=`
    /// the target, then decodes forward from that offset until the target
    /// is produced, overshot, or the data section ends. Because the writer
    /// indexes every record the search normally lands exactly on the
    /// target; the forward scan also tolerates sparser indexes.
    ///
    /// Returns the stored record tombstone-or-not; `Ok(None)` when the key
    /// is absent.
    pub fn get(&self, key: &str) -> Result<Option<Record>, RunError> {
        if !self.meta.contains_key(key) {
            return Ok(None);
        }

        let slot = self.index.partition_point(|(k, _)| k.as_str() <= key);
        if slot == 0 {
            return Ok(None);
        }
        let start = self.index[slot - 1].1;

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(start))?;
        let mut pos = start;
        while pos < self.data_len {
            let rec = codec::decode(&mut *file)?;
            pos += codec::encoded_len(&rec);
            if rec.key() == key {
                return Ok(Some(rec));
            }
            if rec.key() > key {
                break;
            }
        }
        Ok(None)
    }

    /// Forward iterator over the data section.
    ///
    /// Records with key `< from` are dropped; iteration stops at the first
    /// key `>= to`. The iterator holds its own file handle, released on
    /// drop.
    pub fn iter(&self, from: Option<&str>, to: Option<&str>) -> Result<RunIter, RunError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(0))?;
        Ok(RunIter {
            file: reader,
            pos: 0,
            data_len: self.data_len,
            from: from.map(str::to_string),
            to: to.map(str::to_string),
        })
    }
}

impl std::fmt::Debug for RunReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunReader")
            .field("path", &self.path)
            .field("entries", &self.index.len())
            .finish()
    }
}

/// Forward scan over one run's data section.
pub struct RunIter {
    file: BufReader<File>,
    pos: u64,
    data_len: u64,
    from: Option<String>,
    to: Option<String>,
}

impl RunIter {
    /// Next record in key order, or `Ok(None)` when the scan is done.
    pub fn next_record(&mut self) -> Result<Option<Record>, RunError> {
        while self.pos < self.data_len {
            let rec = codec::decode(&mut self.file)?;
            self.pos += codec::encoded_len(&rec);

            if let Some(from) = &self.from {
                if rec.key() < from.as_str() {
                    continue;
                }
                self.from = None;
            }
            if let Some(to) = &self.to {
                if rec.key() >= to.as_str() {
                    self.pos = self.data_len;
                    return Ok(None);
                }
            }
            return Ok(Some(rec));
        }
        Ok(None)
    }
}
