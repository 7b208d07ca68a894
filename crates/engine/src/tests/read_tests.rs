use anyhow::Result;
use tempfile::tempdir;

use super::open_engine;

// --------------------- Tombstone visibility ---------------------

#[test]
fn delete_hides_value() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.set("k", "v")?;
    engine.delete("k")?;
    assert_eq!(engine.get("k")?, None);
    Ok(())
}

#[test]
fn delete_of_unknown_key_reads_as_absent() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.delete("ghost")?;
    assert_eq!(engine.get("ghost")?, None);
    Ok(())
}

#[test]
fn reinsert_after_delete_resurrects_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.set("k", "v1")?;
    engine.delete("k")?;
    engine.set("k", "v2")?;
    assert_eq!(engine.get("k")?.as_deref(), Some("v2"));
    Ok(())
}

// --------------------- Layer precedence ---------------------

#[test]
fn memtable_tombstone_shadows_flushed_value() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.set("k", "persisted")?;
    engine.flush()?;
    assert_eq!(engine.get("k")?.as_deref(), Some("persisted"));

    // delete lives only in the memtable; the value lives in a run
    engine.delete("k")?;
    assert_eq!(engine.get("k")?, None);
    Ok(())
}

#[test]
fn memtable_value_shadows_flushed_tombstone() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.set("k", "v1")?;
    engine.delete("k")?;
    engine.flush()?;
    assert_eq!(engine.get("k")?, None);

    engine.set("k", "v2")?;
    assert_eq!(engine.get("k")?.as_deref(), Some("v2"));
    Ok(())
}

#[test]
fn newest_run_wins_across_flushes() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.set("x", "old")?;
    engine.flush()?;
    engine.set("x", "new")?;
    engine.flush()?;

    assert_eq!(engine.run_count(), 2);
    assert_eq!(engine.get("x")?.as_deref(), Some("new"));
    Ok(())
}

#[test]
fn stats_count_reads_and_writes() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.set("a", "1")?;
    engine.set("b", "2")?;
    engine.delete("a")?;
    engine.get("a")?;
    engine.get("b")?;

    let stats = engine.stats();
    assert_eq!(stats.total_writes, 3);
    assert_eq!(stats.total_reads, 2);
    assert_eq!(stats.memtable_entries, 2);
    Ok(())
}
