//! Single-threaded flush worker.
//!
//! Consumes flush signals in FIFO order. Each flush snapshots the frozen
//! table, streams it into a new run file, publishes the run, clears the
//! frozen slot under the engine writer lock, and finally truncates the
//! WAL. Any failure cancels the writer and leaves the frozen slot
//! populated; writers parked on the slot re-send the signal, so the next
//! attempt retries.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use sstable::RunWriter;
use tracing::{error, info};

use crate::{EngineError, EngineInner};

pub(crate) enum FlushMsg {
    Flush,
    Shutdown,
}

pub(crate) fn run_flush_worker(inner: &Arc<EngineInner>, rx: &Receiver<FlushMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            FlushMsg::Shutdown => break,
            FlushMsg::Flush => {
                if let Err(e) = flush_frozen(inner) {
                    error!("memtable flush failed: {e}");
                }
            }
        }
    }
}

fn flush_frozen(inner: &EngineInner) -> Result<(), EngineError> {
    let frozen = {
        let tables = inner.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.frozen.clone()
    };
    let Some(frozen) = frozen else {
        // coalesced signal; the slot already drained
        inner.notify_frozen_slot();
        return Ok(());
    };

    let snapshot = frozen.snapshot();
    let path = inner.catalog.new_path();
    let mut writer = RunWriter::create(&path)?;
    for record in snapshot.iter() {
        if let Err(e) = writer.write(record) {
            writer.cancel();
            return Err(e.into());
        }
    }
    let meta = writer.finish()?;
    info!(
        file = %meta.file_name(),
        entries = meta.entry_count,
        "flushed memtable to run file"
    );

    inner.catalog.publish(meta);

    {
        let mut tables = inner.tables.write().unwrap_or_else(|e| e.into_inner());
        // only clear the slot if it still holds the table we persisted
        if tables
            .frozen
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &frozen))
        {
            tables.frozen = None;
        }
    }

    // Everything the WAL held is now safe in a published run.
    if let Some(wal) = &inner.wal {
        wal.lock().unwrap_or_else(|e| e.into_inner()).truncate()?;
    }

    inner.notify_frozen_slot();
    Ok(())
}
