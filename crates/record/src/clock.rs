use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic millisecond clock.
///
/// Wall-clock milliseconds collide under high write rates, which would make
/// version resolution between records ambiguous. Every tick therefore
/// returns `max(wall_now, last + 1)`, so a single engine never stamps two
/// records with the same timestamp.
///
/// One `Clock` is shared (via `Arc`) between the engine write path and the
/// write-ahead log.
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicI64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the clock's floor so that future ticks are strictly greater
    /// than `ts`. Used after WAL replay: recovered records may carry
    /// timestamps ahead of the wall clock, and new writes must supersede
    /// them.
    pub fn advance_to(&self, ts: i64) {
        self.last.fetch_max(ts, Ordering::AcqRel);
    }

    /// Returns the next timestamp, strictly greater than any previously
    /// returned by this clock.
    pub fn now_ms(&self) -> i64 {
        let wall = wall_ms();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(observed) => prev = observed,
            }
        }
    }
}

fn wall_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
