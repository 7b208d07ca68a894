//! Registry of live runs.
//!
//! The catalog tracks every published run's metadata, hands out new file
//! paths, owns the reader cache, and picks size-tiered compaction
//! candidates. It is shared between the engine read path and the
//! compaction worker: list mutations take the writer lock, lookups take a
//! reader share.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use record::Record;
use tracing::warn;

use crate::format::{self, RunMeta};
use crate::reader::RunReader;
use crate::RunError;

/// Size-tier boundaries for compaction grouping.
const TIER0_MAX_BYTES: u64 = 64 * 1024 * 1024;
const TIER1_MAX_BYTES: u64 = 256 * 1024 * 1024;
const TIER2_MAX_BYTES: u64 = 1024 * 1024 * 1024;

/// Tracks live runs, newest first, plus the reader cache and file-id
/// counter.
///
/// Invariant: every run in the list is fully written and present on disk;
/// removal from the list always deletes the underlying file.
pub struct Catalog {
    dir: PathBuf,
    runs: RwLock<Vec<RunMeta>>,
    readers: Mutex<HashMap<PathBuf, Arc<RunReader>>>,
    next_file_id: AtomicU64,
}

impl Catalog {
    /// Opens the catalog over `dir`, scanning existing `run_*.dat` files.
    ///
    /// Unreadable run files are logged and skipped so that one corrupt
    /// file does not take the whole store down; the file-id counter always
    /// advances past the highest id seen on disk.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, RunError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut runs = Vec::new();
        let mut max_id = 0u64;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(format::parse_run_file_id)
            else {
                continue;
            };
            max_id = max_id.max(id);
            match RunReader::open(&path) {
                Ok(reader) => runs.push(reader.meta().clone()),
                Err(e) => warn!(path = %path.display(), "failed to load run file: {e}"),
            }
        }
        sort_newest_first(&mut runs);

        Ok(Self {
            dir,
            runs: RwLock::new(runs),
            readers: Mutex::new(HashMap::new()),
            next_file_id: AtomicU64::new(max_id + 1),
        })
    }

    /// Path for the next run file; each call burns one id.
    pub fn new_path(&self) -> PathBuf {
        let id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        self.dir.join(format::run_file_name(id))
    }

    /// Inserts a fully-written run into the live list.
    pub fn publish(&self, meta: RunMeta) {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        runs.push(meta);
        sort_newest_first(&mut runs);
    }

    /// Removes `meta` from the live list, closes its cached reader, and
    /// deletes the file. Returns `false` if the run was not listed.
    pub fn retire(&self, meta: &RunMeta) -> bool {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        self.remove_locked(&mut runs, meta)
    }

    /// Atomically publishes the compaction output (if any) and retires its
    /// inputs, all under one writer-lock critical section so readers never
    /// observe the inputs gone before the output is visible.
    pub fn replace(&self, retired: &[RunMeta], new_meta: Option<RunMeta>) {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        if let Some(meta) = new_meta {
            runs.push(meta);
            sort_newest_first(&mut runs);
        }
        for meta in retired {
            self.remove_locked(&mut runs, meta);
        }
    }

    fn remove_locked(&self, runs: &mut Vec<RunMeta>, meta: &RunMeta) -> bool {
        let Some(pos) = runs.iter().position(|r| r.path == meta.path) else {
            return false;
        };
        runs.remove(pos);

        // Close the cached reader before deleting the file underneath it.
        let evicted = self
            .readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&meta.path);
        drop(evicted);

        if let Err(e) = fs::remove_file(&meta.path) {
            warn!(path = %meta.path.display(), "failed to delete retired run file: {e}");
        }
        true
    }

    /// Point lookup across all runs, newest first.
    ///
    /// The first run whose key bounds contain `key` and which holds a
    /// record for it wins; that record is the newest on-disk version. The
    /// reader handle is cloned out of the cache and released before
    /// returning, so a concurrent retire never deletes a file out from
    /// under a lookup.
    pub fn get(&self, key: &str) -> Result<Option<Record>, RunError> {
        let candidates: Vec<RunMeta> = {
            let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
            runs.iter().filter(|r| r.contains_key(key)).cloned().collect()
        };

        for meta in candidates {
            let reader = match self.reader(&meta) {
                Ok(r) => r,
                // The run may have been retired between the list snapshot
                // and the cache lookup.
                Err(RunError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if let Some(rec) = reader.get(key)? {
                return Ok(Some(rec));
            }
        }
        Ok(None)
    }

    /// Cached reader for `meta`, opened on first use.
    pub fn reader(&self, meta: &RunMeta) -> Result<Arc<RunReader>, RunError> {
        let mut cache = self.readers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(reader) = cache.get(&meta.path) {
            return Ok(Arc::clone(reader));
        }
        let reader = Arc::new(RunReader::open(&meta.path)?);
        cache.insert(meta.path.clone(), Arc::clone(&reader));
        Ok(reader)
    }

    /// Metadata of all live runs, newest first.
    #[must_use]
    pub fn runs(&self) -> Vec<RunMeta> {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.iter().map(|r| r.file_size).sum()
    }

    #[must_use]
    pub fn total_entries(&self) -> u64 {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.iter().map(|r| u64::from(r.entry_count)).sum()
    }

    /// Groups live runs into size tiers:
    /// `<= 64 MiB` -> 0, `<= 256 MiB` -> 1, `<= 1 GiB` -> 2, else 3.
    #[must_use]
    pub fn group_by_tier(&self) -> BTreeMap<u8, Vec<RunMeta>> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        let mut tiers: BTreeMap<u8, Vec<RunMeta>> = BTreeMap::new();
        for meta in runs.iter() {
            tiers
                .entry(tier_for_size(meta.file_size))
                .or_default()
                .push(meta.clone());
        }
        tiers
    }

    /// Picks compaction candidates: the most populated tier, oldest runs
    /// first, at most `max_files`. Returns an empty list when no tier has
    /// at least two runs.
    #[must_use]
    pub fn select_for_compaction(&self, max_files: usize) -> Vec<RunMeta> {
        let tiers = self.group_by_tier();
        let Some((_, mut candidates)) = tiers
            .into_iter()
            .max_by_key(|(tier, members)| (members.len(), std::cmp::Reverse(*tier)))
        else {
            return Vec::new();
        };
        if candidates.len() < 2 {
            return Vec::new();
        }

        // Oldest first: those have accumulated the most superseded data.
        candidates.sort_by_key(|r| (r.created_ms, r.file_id));
        candidates.truncate(max_files);
        candidates
    }

    /// Drops every cached reader, closing the underlying file handles.
    pub fn close(&self) {
        self.readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("dir", &self.dir)
            .field("runs", &self.count())
            .finish()
    }
}

fn sort_newest_first(runs: &mut [RunMeta]) {
    // File id breaks creation-timestamp ties: higher id means later file.
    runs.sort_by_key(|r| std::cmp::Reverse((r.created_ms, r.file_id)));
}

fn tier_for_size(file_size: u64) -> u8 {
    if file_size <= TIER0_MAX_BYTES {
        0
    } else if file_size <= TIER1_MAX_BYTES {
        1
    } else if file_size <= TIER2_MAX_BYTES {
        2
    } else {
        3
    }
}
