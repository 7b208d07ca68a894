//! WAL replay on startup.

use memtable::Memtable;
use record::{Clock, Record};
use wal::{Wal, WalKind};

use crate::EngineError;

/// Replays every intact WAL record into `table`, preserving the original
/// timestamps so that flushes after recovery order correctly against runs
/// written before the crash. Returns the number of records applied.
///
/// The clock is advanced past the newest replayed timestamp; without this,
/// a write issued right after recovery could be stamped older than a
/// record it is meant to supersede.
pub(crate) fn replay(
    wal: &Wal,
    table: &mut Memtable,
    clock: &Clock,
) -> Result<usize, EngineError> {
    let records = wal.recover()?;
    let count = records.len();

    let mut max_ts = i64::MIN;
    for record in records {
        max_ts = max_ts.max(record.timestamp_ms);
        match record.kind {
            WalKind::Put => table.insert(Record::put(
                record.key,
                record.value.unwrap_or_default(),
                record.timestamp_ms,
            )),
            WalKind::Delete => table.insert(Record::tombstone(record.key, record.timestamp_ms)),
        }
    }
    if count > 0 {
        clock.advance_to(max_ts);
    }
    Ok(count)
}
