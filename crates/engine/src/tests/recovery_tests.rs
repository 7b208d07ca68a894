use std::sync::Arc;

use anyhow::Result;
use record::Clock;
use tempfile::tempdir;
use wal::Wal;

use super::{open_engine, test_config, wait_until};
use crate::{Engine, WAL_FILE_NAME};

/// Simulates a crash: the engine is leaked without `close`, so nothing in
/// memory is flushed and only the WAL survives.
fn crash(engine: Engine) {
    std::mem::forget(engine);
}

#[test]
fn recovers_mutations_from_wal() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path(), 1_000);
        engine.set("a", "1")?;
        engine.set("b", "2")?;
        engine.delete("a")?;
        crash(engine);
    }

    let engine = open_engine(dir.path(), 1_000);
    assert_eq!(engine.get("a")?, None);
    assert_eq!(engine.get("b")?.as_deref(), Some("2"));
    Ok(())
}

#[test]
fn recovers_from_wal_written_out_of_process() -> Result<()> {
    // drive the log directly, as if a previous process died mid-flight
    let dir = tempdir()?;
    {
        let mut wal = Wal::open(dir.path().join(WAL_FILE_NAME), 0, Arc::new(Clock::new()))?;
        wal.log_put("a", "1")?;
        wal.log_put("b", "2")?;
        wal.log_delete("a")?;
    }

    let engine = open_engine(dir.path(), 1_000);
    assert_eq!(engine.get("a")?, None);
    assert_eq!(engine.get("b")?.as_deref(), Some("2"));
    assert_eq!(engine.stats().memtable_entries, 2);
    Ok(())
}

#[test]
fn corrupt_wal_tail_recovers_intact_prefix() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path(), 1_000);
        engine.set("a", "1")?;
        engine.set("b", "2")?;
        crash(engine);
    }

    // chop the tail, as a crash mid-append would
    let wal_path = dir.path().join(WAL_FILE_NAME);
    let bytes = std::fs::read(&wal_path)?;
    std::fs::write(&wal_path, &bytes[..bytes.len() - 2])?;

    let engine = open_engine(dir.path(), 1_000);
    assert_eq!(engine.get("a")?.as_deref(), Some("1"));
    assert_eq!(engine.get("b")?, None, "truncated suffix is discarded");
    Ok(())
}

#[test]
fn writes_after_recovery_supersede_recovered_records() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path(), 1_000);
        // burn through timestamps so the clock runs ahead of wall time
        for i in 0..2_000 {
            engine.set("hot", &format!("v{i}"))?;
        }
        crash(engine);
    }

    let engine = open_engine(dir.path(), 1_000);
    assert_eq!(engine.get("hot")?.as_deref(), Some("v1999"));

    engine.set("hot", "after-restart")?;
    assert_eq!(engine.get("hot")?.as_deref(), Some("after-restart"));
    engine.flush()?;
    assert_eq!(engine.get("hot")?.as_deref(), Some("after-restart"));
    Ok(())
}

#[test]
fn recovery_then_flush_orders_against_existing_runs() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path(), 1_000);
        engine.set("k", "flushed")?;
        engine.flush()?;
        engine.set("k", "only-in-wal")?;
        crash(engine);
    }

    let engine = open_engine(dir.path(), 1_000);
    assert_eq!(engine.get("k")?.as_deref(), Some("only-in-wal"));

    // flushing the recovered table produces a newer run that still wins
    engine.flush()?;
    assert_eq!(engine.run_count(), 2);
    assert_eq!(engine.get("k")?.as_deref(), Some("only-in-wal"));

    engine.compact()?;
    assert_eq!(engine.get("k")?.as_deref(), Some("only-in-wal"));
    Ok(())
}

#[test]
fn flushed_data_needs_no_wal() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path(), 1_000);
        engine.set("a", "1")?;
        engine.flush()?;
        // the WAL is truncated by the flush; the run alone carries the data
        let wal_path = dir.path().join(WAL_FILE_NAME);
        wait_until(|| std::fs::metadata(&wal_path).map_or(false, |m| m.len() == 0));
        crash(engine);
    }
    let engine = open_engine(dir.path(), 1_000);
    assert_eq!(engine.get("a")?.as_deref(), Some("1"));
    Ok(())
}

#[test]
fn no_wal_means_no_recovery() -> Result<()> {
    let dir = tempdir()?;
    let config = crate::EngineConfig {
        enable_wal: false,
        ..test_config()
    };
    {
        let engine = Engine::open(dir.path(), config.clone())?;
        engine.set("gone", "v")?;
        crash(engine);
    }

    let engine = Engine::open(dir.path(), config)?;
    assert_eq!(engine.get("gone")?, None);
    Ok(())
}
