use std::collections::BTreeMap;
use std::sync::Arc;

use record::{Clock, Record};

/// Per-entry overhead constant for the byte-footprint estimate. The
/// estimate only governs flush-threshold sizing, so it approximates rather
/// than measures.
const ENTRY_OVERHEAD: usize = 64;

/// Ordered in-memory table holding the latest record per key.
///
/// Keys are ordered byte-lexicographically (the natural `String` order).
/// A table is mutated only while it is the engine's *active* table; once
/// frozen it is read-only until its snapshot has been persisted as a run
/// file.
#[derive(Debug)]
pub struct Memtable {
    map: BTreeMap<String, Record>,
    byte_estimate: usize,
    created_ms: i64,
    clock: Arc<Clock>,
}

impl Memtable {
    pub fn new(clock: Arc<Clock>) -> Self {
        let created_ms = clock.now_ms();
        Self {
            map: BTreeMap::new(),
            byte_estimate: 0,
            created_ms,
            clock,
        }
    }

    /// Inserts or overwrites a live record for `key`, stamped with the
    /// current clock time.
    pub fn put(&mut self, key: String, value: String) {
        let ts = self.clock.now_ms();
        self.insert(Record::put(key, value, ts));
    }

    /// Inserts or overwrites a tombstone for `key`.
    pub fn delete(&mut self, key: String) {
        let ts = self.clock.now_ms();
        self.insert(Record::tombstone(key, ts));
    }

    /// Inserts a pre-stamped record, used by WAL replay to preserve the
    /// original timestamps. An existing newer record for the key wins.
    pub fn insert(&mut self, record: Record) {
        let estimate = entry_estimate(&record);
        match self.map.get(record.key()) {
            Some(old) if old.supersedes(&record) => return,
            Some(old) => {
                self.byte_estimate = self.byte_estimate.saturating_sub(entry_estimate(old));
            }
            None => {}
        }
        self.byte_estimate += estimate;
        self.map.insert(record.key().to_string(), record);
    }

    /// Exact-match lookup. Returns the stored record tombstone-or-not; the
    /// caller decides whether a tombstone hides the value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.map.get(key)
    }

    /// Takes a read-only copy that is independent of later mutations.
    #[must_use]
    pub fn snapshot(&self) -> MemtableSnapshot {
        MemtableSnapshot {
            records: self.map.values().cloned().collect(),
        }
    }

    /// Records in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.map.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Estimated in-memory footprint in bytes.
    #[must_use]
    pub fn byte_estimate(&self) -> usize {
        self.byte_estimate
    }

    #[must_use]
    pub fn created_ms(&self) -> i64 {
        self.created_ms
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.byte_estimate = 0;
    }
}

/// A frozen, read-only copy of a memtable taken at flush time.
///
/// Owns its data: the source table may be mutated or discarded while the
/// snapshot is being streamed into a run writer.
#[derive(Debug)]
pub struct MemtableSnapshot {
    records: Vec<Record>,
}

impl MemtableSnapshot {
    /// Records in ascending key order.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn entry_estimate(record: &Record) -> usize {
    2 * record.key().len() + 2 * record.value().map_or(0, str::len) + ENTRY_OVERHEAD
}
