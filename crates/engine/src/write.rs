//! Write path: `set()`, `delete()`, `flush()`, and the freeze handoff.
//!
//! All mutations flow through here. Each is appended to the WAL for
//! durability before touching the active memtable. When the active table
//! reaches the flush threshold it is swapped into the frozen slot for the
//! flush worker; a writer that finds the slot still occupied blocks until
//! the previous flush drains (backpressure).

use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use memtable::Memtable;

use crate::flush::FlushMsg;
use crate::{Engine, EngineError, EngineInner, MAX_KEY_SIZE, MAX_VALUE_SIZE};

impl Engine {
    /// Inserts or updates a key-value pair.
    pub fn set(&self, key: &str, value: &str) -> Result<(), EngineError> {
        self.inner.check_open()?;
        check_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(EngineError::ValueTooLarge(value.len()));
        }
        self.inner.total_writes.fetch_add(1, Ordering::Relaxed);

        let needs_freeze = {
            let mut tables = self.inner.tables.write().unwrap_or_else(|e| e.into_inner());
            if let Some(wal) = &self.inner.wal {
                wal.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .log_put(key, value)?;
            }
            tables.active.put(key.to_string(), value.to_string());
            tables.active.len() >= self.inner.config.flush_threshold
        };
        if needs_freeze {
            self.inner.freeze_active();
        }
        Ok(())
    }

    /// Deletes a key by writing a tombstone. The tombstone shadows any
    /// older value in the frozen table or in run files.
    pub fn delete(&self, key: &str) -> Result<(), EngineError> {
        self.inner.check_open()?;
        check_key(key)?;
        self.inner.total_writes.fetch_add(1, Ordering::Relaxed);

        let needs_freeze = {
            let mut tables = self.inner.tables.write().unwrap_or_else(|e| e.into_inner());
            if let Some(wal) = &self.inner.wal {
                wal.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .log_delete(key)?;
            }
            tables.active.delete(key.to_string());
            tables.active.len() >= self.inner.config.flush_threshold
        };
        if needs_freeze {
            self.inner.freeze_active();
        }
        Ok(())
    }

    /// Forces the active memtable out to a run file and waits for it to be
    /// published. A no-op when there is nothing in memory.
    pub fn flush(&self) -> Result<(), EngineError> {
        self.inner.check_open()?;
        self.inner.flush_blocking();
        Ok(())
    }
}

fn check_key(key: &str) -> Result<(), EngineError> {
    if key.is_empty() {
        return Err(EngineError::EmptyKey);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(EngineError::KeyTooLarge(key.len()));
    }
    Ok(())
}

impl EngineInner {
    /// Moves the active table into the frozen slot once it is over the
    /// flush threshold, blocking while the slot is occupied.
    pub(crate) fn freeze_active(&self) {
        loop {
            {
                let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
                // another writer may have frozen in the meantime
                if tables.active.len() < self.config.flush_threshold {
                    return;
                }
                if tables.frozen.is_none() {
                    let fresh = Memtable::new(Arc::clone(&self.clock));
                    let full = mem::replace(&mut tables.active, fresh);
                    tables.frozen = Some(Arc::new(full));
                    let _ = self.flush_tx.send(FlushMsg::Flush);
                    return;
                }
            }
            self.wait_for_frozen_slot();
        }
    }

    /// Synchronous flush: drains the frozen slot, freezes the active table
    /// regardless of the threshold, and waits until its run file is
    /// published.
    pub(crate) fn flush_blocking(&self) {
        loop {
            {
                let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
                if tables.frozen.is_none() {
                    if tables.active.is_empty() {
                        return;
                    }
                    let fresh = Memtable::new(Arc::clone(&self.clock));
                    let full = mem::replace(&mut tables.active, fresh);
                    tables.frozen = Some(Arc::new(full));
                    let _ = self.flush_tx.send(FlushMsg::Flush);
                    break;
                }
            }
            self.wait_for_frozen_slot();
        }
        self.wait_for_frozen_slot();
    }
}
