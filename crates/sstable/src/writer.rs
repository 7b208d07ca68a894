use byteorder::{BigEndian, WriteBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use record::{codec, Record};

use crate::format::{self, Footer, RunMeta};
use crate::RunError;

/// Streaming writer for a new run file.
///
/// The caller feeds records in strictly ascending key order (the memtable
/// snapshot and the merge iterator both guarantee this). The index is kept
/// in memory, one `(key, offset)` entry per record, and written out by
/// [`finish`](RunWriter::finish) together with the footer.
///
/// On any failure the caller must invoke [`cancel`](RunWriter::cancel) so
/// that a partial file is never left behind; `finish` cleans up after its
/// own errors.
pub struct RunWriter {
    path: PathBuf,
    file: BufWriter<File>,
    index: Vec<(String, u64)>,
    offset: u64,
    min_key: Option<String>,
    max_key: Option<String>,
    entry_count: u32,
}

impl RunWriter {
    /// Creates (truncating) the run file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, RunError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
            index: Vec::new(),
            offset: 0,
            min_key: None,
            max_key: None,
            entry_count: 0,
        })
    }

    /// Appends `record` to the data section and indexes its offset.
    pub fn write(&mut self, record: &Record) -> Result<(), RunError> {
        let key = record.key();
        if self.min_key.as_deref().map_or(true, |min| key < min) {
            self.min_key = Some(key.to_string());
        }
        if self.max_key.as_deref().map_or(true, |max| key > max) {
            self.max_key = Some(key.to_string());
        }

        self.index.push((key.to_string(), self.offset));
        codec::encode(&mut self.file, record)?;
        self.offset += codec::encoded_len(record);
        self.entry_count += 1;
        Ok(())
    }

    #[must_use]
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Writes the index, index offset, footer and trailing footer length,
    /// then flushes and fsyncs. Returns the new run's metadata.
    ///
    /// If anything fails mid-trailer the partial file is deleted before the
    /// error is returned.
    pub fn finish(mut self) -> Result<RunMeta, RunError> {
        match self.write_trailer() {
            Ok(meta) => Ok(meta),
            Err(e) => {
                let _ = fs::remove_file(&self.path);
                Err(e)
            }
        }
    }

    fn write_trailer(&mut self) -> Result<RunMeta, RunError> {
        let index_offset = self.offset;
        for (key, offset) in &self.index {
            self.file.write_u32::<BigEndian>(key.len() as u32)?;
            self.file.write_all(key.as_bytes())?;
            self.file.write_i64::<BigEndian>(*offset as i64)?;
        }

        self.file.write_i64::<BigEndian>(index_offset as i64)?;

        let footer = Footer {
            entry_count: self.entry_count,
            min_key: self.min_key.take().unwrap_or_default(),
            max_key: self.max_key.take().unwrap_or_default(),
            created_ms: wall_ms(),
        };
        let footer_len = footer.write_to(&mut self.file)?;
        self.file.write_u32::<BigEndian>(footer_len)?;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        let file_size = self.file.get_ref().metadata()?.len();
        Ok(format::meta_for(&self.path, &footer, file_size))
    }

    /// Closes the stream and deletes the partial file. Safe after any
    /// number of `write` calls.
    pub fn cancel(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.path);
    }
}

fn wall_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
