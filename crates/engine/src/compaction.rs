//! Background size-tiered compaction worker.
//!
//! A single thread ticks every `compaction_interval_ms`. When the catalog
//! holds at least `compaction_threshold` runs it merges the oldest runs of
//! the most populated size tier into one new run, eliminating superseded
//! versions and, when safe, tombstones. On-demand [`Compactor::trigger`]
//! runs the same pass synchronously; a non-blocking try-lock coalesces
//! concurrent triggers with the periodic tick.
//!
//! Tick errors are logged and swallowed: the partial output is canceled,
//! the catalog is untouched, and the next tick retries.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use sstable::{Catalog, MergeIterator, RunMeta, RunWriter};
use tracing::{error, info, warn};

use crate::{EngineConfig, EngineError};

/// How long `shutdown` waits for an in-flight pass before detaching the
/// worker thread.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) struct Compactor {
    shared: Arc<CompactorShared>,
    shutdown_tx: Sender<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct CompactorShared {
    catalog: Arc<Catalog>,
    compaction_threshold: usize,
    max_compaction_files: usize,
    /// Non-reentrant try-lock; periodic and on-demand passes coalesce.
    lock: Mutex<()>,
    /// Set by `shutdown`; the merge loop checks it per record so an
    /// in-flight pass aborts promptly, canceling its partial output.
    stopping: AtomicBool,
}

impl Compactor {
    pub(crate) fn start(
        catalog: Arc<Catalog>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let shared = Arc::new(CompactorShared {
            catalog,
            compaction_threshold: config.compaction_threshold,
            max_compaction_files: config.max_compaction_files,
            lock: Mutex::new(()),
            stopping: AtomicBool::new(false),
        });
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let interval = Duration::from_millis(config.compaction_interval_ms.max(1));

        let thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("silt-compaction".into())
                .spawn(move || run_ticker(&shared, &shutdown_rx, interval))?
        };

        Ok(Self {
            shared,
            shutdown_tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Runs one pass now. `Ok(false)` means another pass holds the lock or
    /// no tier had enough runs.
    pub(crate) fn trigger(&self) -> Result<bool, EngineError> {
        self.shared.try_compact()
    }

    /// Signals the worker and waits for it to stop, bounded by
    /// [`SHUTDOWN_TIMEOUT`]. An in-flight merge observes the stop flag,
    /// cancels its partial output file, and returns without touching the
    /// catalog.
    pub(crate) fn shutdown(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else { return };

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!("compaction worker did not stop within {SHUTDOWN_TIMEOUT:?}, detaching");
        }
    }
}

fn run_ticker(shared: &CompactorShared, shutdown_rx: &Receiver<()>, interval: Duration) {
    loop {
        match shutdown_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if shared.catalog.count() < shared.compaction_threshold {
            continue;
        }
        if let Err(e) = shared.try_compact() {
            error!("compaction failed: {e}");
        }
    }
}

impl CompactorShared {
    fn try_compact(&self) -> Result<bool, EngineError> {
        let Ok(_guard) = self.lock.try_lock() else {
            return Ok(false);
        };
        if self.stopping.load(Ordering::Acquire) {
            return Ok(false);
        }

        let candidates = self
            .catalog
            .select_for_compaction(self.max_compaction_files);
        if candidates.len() < 2 {
            return Ok(false);
        }
        let drop_tombstones = may_drop_tombstones(&self.catalog.runs(), &candidates);

        info!(
            inputs = candidates.len(),
            drop_tombstones, "starting compaction"
        );
        let start = Instant::now();

        // newest first, so the merge resolves (key, timestamp) ties toward
        // the newer run
        let mut ordered = candidates.clone();
        ordered.sort_by_key(|r| std::cmp::Reverse((r.created_ms, r.file_id)));
        let mut readers = Vec::with_capacity(ordered.len());
        for meta in &ordered {
            readers.push(self.catalog.reader(meta)?);
        }

        let mut merge = MergeIterator::new(&readers, drop_tombstones)?;
        let path = self.catalog.new_path();
        let mut writer = RunWriter::create(&path)?;
        loop {
            if self.stopping.load(Ordering::Acquire) {
                writer.cancel();
                info!("compaction aborted by shutdown, partial output canceled");
                return Ok(false);
            }
            match merge.next_entry() {
                Ok(Some(record)) => {
                    if let Err(e) = writer.write(&record) {
                        writer.cancel();
                        return Err(e.into());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    writer.cancel();
                    return Err(e.into());
                }
            }
        }
        let meta = writer.finish()?;

        // every input record was a dropped tombstone: skip the empty run
        let output_name = meta.file_name().to_string();
        let new_meta = if meta.entry_count == 0 {
            let _ = std::fs::remove_file(&meta.path);
            None
        } else {
            Some(meta)
        };
        let merged_entries = new_meta.as_ref().map_or(0, |m| m.entry_count);
        self.catalog.replace(&candidates, new_meta);

        info!(
            inputs = candidates.len(),
            entries = merged_entries,
            output = %output_name,
            took_ms = start.elapsed().as_millis() as u64,
            "compaction finished"
        );
        Ok(true)
    }
}

/// A tombstone may be eliminated only when no run outside the merge could
/// still hold a pre-deletion version of its key: every non-selected run
/// must be newer than every selected run. Newer non-selected versions are
/// unaffected: they supersede the tombstone by timestamp anyway.
pub(crate) fn may_drop_tombstones(all_runs: &[RunMeta], selected: &[RunMeta]) -> bool {
    let Some(newest_selected) = selected.iter().map(|r| (r.created_ms, r.file_id)).max() else {
        return false;
    };
    let selected_paths: HashSet<&PathBuf> = selected.iter().map(|r| &r.path).collect();
    all_runs
        .iter()
        .filter(|r| !selected_paths.contains(&r.path))
        .all(|r| (r.created_ms, r.file_id) >= newest_selected)
}
