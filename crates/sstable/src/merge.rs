//! K-way merge over run iterators.
//!
//! Produces records in ascending key order. When the same key appears in
//! several runs, only the version with the **greatest timestamp** is
//! emitted. This is the core primitive for compaction: walk N input runs
//! in sorted order, resolve duplicates by recency, and stream the result
//! into a new run writer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use record::Record;

use crate::reader::{RunIter, RunReader};
use crate::RunError;

/// One pending record from a source iterator.
///
/// Heap order: smallest key first; for equal keys, greatest timestamp
/// first; for equal `(key, timestamp)`, the lowest source id first. The
/// caller feeds newer runs with lower ids, so their entries win ties.
struct HeapEntry {
    record: Record,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the key and source comparisons
        // so the "greatest" element is the one we want to pop first.
        other
            .record
            .key()
            .cmp(self.record.key())
            .then_with(|| self.record.timestamp_ms().cmp(&other.record.timestamp_ms()))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges N sorted run iterators into one ascending, deduplicated stream.
pub struct MergeIterator {
    sources: Vec<RunIter>,
    heap: BinaryHeap<HeapEntry>,
    drop_tombstones: bool,
}

impl MergeIterator {
    /// Opens a forward iterator per reader and seeds the heap.
    ///
    /// `readers` must be ordered newest-first so that ties on
    /// `(key, timestamp)` resolve to the newer run. `drop_tombstones` may
    /// only be `true` when no run outside this merge could still hold a
    /// pre-deletion version of any key; the compaction worker computes
    /// that from the catalog before constructing the merge.
    pub fn new(readers: &[Arc<RunReader>], drop_tombstones: bool) -> Result<Self, RunError> {
        let mut sources = Vec::with_capacity(readers.len());
        let mut heap = BinaryHeap::with_capacity(readers.len());

        for (source, reader) in readers.iter().enumerate() {
            let mut iter = reader.iter(None, None)?;
            if let Some(record) = iter.next_record()? {
                heap.push(HeapEntry { record, source });
            }
            sources.push(iter);
        }

        Ok(Self {
            sources,
            heap,
            drop_tombstones,
        })
    }

    /// Next merged record, or `Ok(None)` when all sources are exhausted.
    pub fn next_entry(&mut self) -> Result<Option<Record>, RunError> {
        loop {
            let top = match self.heap.pop() {
                Some(e) => e,
                None => return Ok(None),
            };
            self.advance(top.source)?;

            // Drain every other version of this key, keeping the newest.
            let mut winner = top.record;
            while let Some(peek) = self.heap.peek() {
                if peek.record.key() != winner.key() {
                    break;
                }
                let dup = self.heap.pop().expect("peeked entry");
                self.advance(dup.source)?;
                if dup.record.supersedes(&winner) {
                    winner = dup.record;
                }
            }

            if self.drop_tombstones && winner.is_tombstone() {
                continue;
            }
            return Ok(Some(winner));
        }
    }

    fn advance(&mut self, source: usize) -> Result<(), RunError> {
        if let Some(record) = self.sources[source].next_record()? {
            self.heap.push(HeapEntry { record, source });
        }
        Ok(())
    }
}
