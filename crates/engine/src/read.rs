//! Read path: `get()`.
//!
//! Point lookups consult the active memtable, then the frozen table, then
//! the run catalog (newest run first). The first record found for the key
//! is its newest version; a tombstone hides the value. The engine lock is
//! released before the catalog is consulted so disk reads never block
//! writers.

use std::sync::atomic::Ordering;

use record::Record;

use crate::{Engine, EngineError};

impl Engine {
    /// Looks up the current value for `key`.
    ///
    /// Returns `Ok(None)` when the key was never written or its last
    /// mutation was a delete. Absence is not an error.
    pub fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        self.inner.check_open()?;
        self.inner.total_reads.fetch_add(1, Ordering::Relaxed);

        {
            let tables = self.inner.tables.read().unwrap_or_else(|e| e.into_inner());
            let hit = tables
                .active
                .get(key)
                .or_else(|| tables.frozen.as_ref().and_then(|frozen| frozen.get(key)));
            if let Some(record) = hit {
                return Ok(visible_value(record));
            }
        }

        match self.inner.catalog.get(key)? {
            Some(record) => Ok(visible_value(&record)),
            None => Ok(None),
        }
    }
}

fn visible_value(record: &Record) -> Option<String> {
    if record.is_tombstone() {
        None
    } else {
        record.value().map(str::to_string)
    }
}
