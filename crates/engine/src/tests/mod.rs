mod read_tests;
mod recovery_tests;
mod write_tests;

use std::path::Path;
use std::time::{Duration, Instant};

use crate::{Engine, EngineConfig};

/// Polls `cond` until it holds or a 5-second deadline passes. The flush
/// worker clears the frozen slot before it truncates the WAL, so tests
/// asserting on the WAL file must tolerate that tiny window.
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(cond(), "condition not reached within deadline");
}

/// Config with background compaction effectively disabled and per-write
/// fsync, so tests control every state transition themselves.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        compaction_interval_ms: 3_600_000,
        wal_sync_interval_ms: 0,
        ..EngineConfig::default()
    }
}

pub fn open_engine(dir: &Path, flush_threshold: usize) -> Engine {
    let config = EngineConfig {
        flush_threshold,
        ..test_config()
    };
    Engine::open(dir, config).unwrap()
}

pub fn count_run_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "dat")
                .unwrap_or(false)
        })
        .count()
}

/// Opens every run file in `dir` and collects `(key, value, tombstone)`
/// triples across all of them.
pub fn dump_runs(dir: &Path) -> Vec<(String, Option<String>, bool)> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|s| s.to_str()) != Some("dat") {
            continue;
        }
        let reader = sstable::RunReader::open(&path).unwrap();
        let mut iter = reader.iter(None, None).unwrap();
        while let Some(record) = iter.next_record().unwrap() {
            out.push((
                record.key().to_string(),
                record.value().map(str::to_string),
                record.is_tombstone(),
            ));
        }
    }
    out
}
