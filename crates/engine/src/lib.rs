//! # Engine - the SiltKV storage engine
//!
//! The central orchestrator tying the [`memtable`], [`wal`] and [`sstable`]
//! crates together into a single-node, embedded LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Caller threads
//!   |
//!   v
//! ┌─────────────────────────────────────────────────┐
//! │                    ENGINE                       │
//! │                                                 │
//! │ write.rs → WAL append → active memtable         │
//! │               |                                 │
//! │               |  (flush threshold reached?)     │
//! │               v           yes                   │
//! │          freeze: active → frozen slot           │
//! │               |                                 │
//! │               v  (flush worker thread)          │
//! │          snapshot → new run file → catalog      │
//! │               |    → clear slot → truncate WAL  │
//! │                                                 │
//! │ compaction.rs (worker thread, periodic tick)    │
//! │          k-way merge N runs → 1 run             │
//! │                                                 │
//! │ read.rs → active → frozen → runs (newest-first) │
//! │            (first hit wins; tombstones hide)    │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Module responsibilities
//!
//! | Module         | Purpose                                            |
//! |----------------|----------------------------------------------------|
//! | `lib.rs`       | `Engine` struct, open/close, stats, `Drop`         |
//! | [`config`]     | Plain configuration record                         |
//! | [`error`]      | Typed error surface                                |
//! | `write`        | `set()`, `delete()`, `flush()`, freeze handoff     |
//! | `read`         | `get()`                                            |
//! | `flush`        | Single-threaded flush worker                       |
//! | `compaction`   | Background size-tiered compaction worker           |
//! | `recovery`     | WAL replay on startup                              |
//!
//! ## Crash safety
//!
//! Every mutation is appended to the WAL **before** it touches the
//! memtable, and the WAL is truncated only **after** the flushed run file
//! is published in the catalog. Compaction publishes its output and
//! retires its inputs inside one catalog critical section; a crash in
//! between leaves duplicate versions on disk, which timestamp precedence
//! resolves on read and the next compaction cycle cleans up.

mod compaction;
pub mod config;
pub mod error;
mod flush;
mod read;
mod recovery;
mod write;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use memtable::Memtable;
use record::Clock;
use sstable::Catalog;
use tracing::info;
use wal::Wal;

use compaction::Compactor;
use flush::FlushMsg;

pub use config::EngineConfig;
pub use error::EngineError;

/// The write-ahead log lives next to the run files, in the data directory.
pub const WAL_FILE_NAME: &str = "database.wal";

/// Maximum allowed key size in bytes (64 KiB), matching the codec's decode
/// cap.
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB), matching the codec's
/// decode cap.
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// The (active, frozen) memtable slots guarded by the engine rwlock.
pub(crate) struct TableState {
    pub(crate) active: Memtable,
    /// Sealed table awaiting flush. `None` once its run file is published.
    pub(crate) frozen: Option<Arc<Memtable>>,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) tables: RwLock<TableState>,
    /// Appends are serialized behind this mutex; the WAL itself is not
    /// thread-safe.
    pub(crate) wal: Option<Mutex<Wal>>,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) clock: Arc<Clock>,
    pub(crate) flush_tx: Sender<FlushMsg>,
    /// Writers park here while the frozen slot is occupied (backpressure).
    pub(crate) flush_gate: (Mutex<()>, Condvar),
    pub(crate) closed: AtomicBool,
    pub(crate) total_reads: AtomicU64,
    pub(crate) total_writes: AtomicU64,
}

impl EngineInner {
    pub(crate) fn check_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    /// Blocks the caller until the frozen slot is empty, nudging the flush
    /// worker on every wait tick so a previously failed flush retries.
    pub(crate) fn wait_for_frozen_slot(&self) {
        let (lock, cvar) = &self.flush_gate;
        let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let occupied = {
                let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
                tables.frozen.is_some()
            };
            if !occupied {
                return;
            }
            let _ = self.flush_tx.send(FlushMsg::Flush);
            let (g, _) = cvar
                .wait_timeout(guard, Duration::from_millis(100))
                .unwrap_or_else(|e| e.into_inner());
            guard = g;
        }
    }

    pub(crate) fn notify_frozen_slot(&self) {
        let (lock, cvar) = &self.flush_gate;
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        cvar.notify_all();
    }
}

/// Single-node, embedded, append-only ordered key-value store.
///
/// # Write path
///
/// 1. Append the mutation to the WAL (durability).
/// 2. Apply it to the active memtable.
/// 3. When the active table reaches `flush_threshold` entries it is moved
///    into the frozen slot and the flush worker persists it as a run file.
///    If the slot is still occupied by the previous table, the writer
///    blocks until it drains.
///
/// # Read path
///
/// 1. Active memtable, then the frozen table if one exists.
/// 2. Run files, newest to oldest, through the catalog.
/// 3. The first record found is the newest version; a tombstone hides it.
///
/// # Recovery
///
/// [`Engine::open`] replays the WAL into a fresh active table, preserving
/// the original record timestamps so ordering against existing runs
/// survives the restart.
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
    compactor: Compactor,
}

/// Point-in-time counters reported by [`Engine::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Entries across the active and frozen memtables.
    pub memtable_entries: usize,
    pub run_count: usize,
    pub run_bytes: u64,
    pub total_reads: u64,
    pub total_writes: u64,
}

impl Engine {
    /// Opens (or creates) a store rooted at `dir`.
    ///
    /// Scans existing run files into the catalog, replays the WAL if
    /// enabled, and starts the flush and compaction workers.
    pub fn open<P: AsRef<Path>>(dir: P, config: EngineConfig) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let clock = Arc::new(Clock::new());
        let catalog = Arc::new(Catalog::open(&dir)?);
        let mut active = Memtable::new(Arc::clone(&clock));

        let wal = if config.enable_wal {
            let wal = Wal::open(
                dir.join(WAL_FILE_NAME),
                config.wal_sync_interval_ms,
                Arc::clone(&clock),
            )?;
            let replayed = recovery::replay(&wal, &mut active, &clock)?;
            if replayed > 0 {
                info!(records = replayed, "recovered mutations from write-ahead log");
            }
            Some(Mutex::new(wal))
        } else {
            None
        };

        let (flush_tx, flush_rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(EngineInner {
            config: config.clone(),
            tables: RwLock::new(TableState {
                active,
                frozen: None,
            }),
            wal,
            catalog: Arc::clone(&catalog),
            clock,
            flush_tx,
            flush_gate: (Mutex::new(()), Condvar::new()),
            closed: AtomicBool::new(false),
            total_reads: AtomicU64::new(0),
            total_writes: AtomicU64::new(0),
        });

        let flush_thread = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("silt-flush".into())
                .spawn(move || flush::run_flush_worker(&inner, &flush_rx))?
        };
        let compactor = Compactor::start(catalog, &config)?;

        Ok(Self {
            inner,
            flush_thread: Mutex::new(Some(flush_thread)),
            compactor,
        })
    }

    /// Runs one compaction pass synchronously.
    ///
    /// Returns `false` when another compaction already holds the lock
    /// (concurrent triggers coalesce) or no tier has enough runs.
    pub fn compact(&self) -> Result<bool, EngineError> {
        self.inner.check_open()?;
        self.compactor.trigger()
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let memtable_entries = {
            let tables = self.inner.tables.read().unwrap_or_else(|e| e.into_inner());
            tables.active.len() + tables.frozen.as_ref().map_or(0, |f| f.len())
        };
        EngineStats {
            memtable_entries,
            run_count: self.inner.catalog.count(),
            run_bytes: self.inner.catalog.total_bytes(),
            total_reads: self.inner.total_reads.load(Ordering::Relaxed),
            total_writes: self.inner.total_writes.load(Ordering::Relaxed),
        }
    }

    /// Number of live run files.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.inner.catalog.count()
    }

    /// Shuts the engine down: refuses new operations, flushes the frozen
    /// and active memtables, stops both workers, and closes the WAL and
    /// all cached run readers.
    pub fn close(&self) -> Result<(), EngineError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Persist everything still in memory before the workers stop. The
        // WAL is truncated by the flush itself, only after publication.
        self.inner.flush_blocking();

        let _ = self.inner.flush_tx.send(FlushMsg::Shutdown);
        if let Some(handle) = self
            .flush_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        self.compactor.shutdown();

        if let Some(wal) = &self.inner.wal {
            wal.lock().unwrap_or_else(|e| e.into_inner()).close()?;
        }
        self.inner.catalog.close();
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.inner.tables.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Engine")
            .field("active_entries", &tables.active.len())
            .field("frozen", &tables.frozen.is_some())
            .field("runs", &self.inner.catalog.count())
            .field("wal", &self.inner.wal.is_some())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Best-effort shutdown on drop. Errors cannot propagate out of `Drop`;
/// anything still unflushed is safe in the WAL and will be recovered on
/// the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
