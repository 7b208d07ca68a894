use anyhow::Result;
use tempfile::tempdir;

use super::{open_engine, test_config};
use crate::{Engine, EngineError};

// --------------------- Basic round-trip ---------------------

#[test]
fn set_then_get() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.set("k1", "v1")?;
    engine.set("k2", "v2")?;

    assert_eq!(engine.get("k1")?.as_deref(), Some("v1"));
    assert_eq!(engine.get("k2")?.as_deref(), Some("v2"));
    assert_eq!(engine.get("k3")?, None);
    Ok(())
}

#[test]
fn update_overwrites_and_keeps_one_entry() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.set("k", "a")?;
    engine.set("k", "b")?;

    assert_eq!(engine.get("k")?.as_deref(), Some("b"));
    assert_eq!(engine.stats().memtable_entries, 1);
    Ok(())
}

#[test]
fn empty_value_is_not_a_delete() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);

    engine.set("k", "")?;
    assert_eq!(engine.get("k")?.as_deref(), Some(""));
    Ok(())
}

// --------------------- Validation ---------------------

#[test]
fn empty_key_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path(), 1_000);

    assert!(matches!(engine.set("", "v"), Err(EngineError::EmptyKey)));
    assert!(matches!(engine.delete(""), Err(EngineError::EmptyKey)));
}

#[test]
fn oversized_key_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path(), 1_000);

    let key = "k".repeat(crate::MAX_KEY_SIZE + 1);
    assert!(matches!(
        engine.set(&key, "v"),
        Err(EngineError::KeyTooLarge(_))
    ));
}

// --------------------- Lifecycle ---------------------

#[test]
fn closed_engine_refuses_operations() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path(), 1_000);
    engine.set("k", "v")?;
    engine.close()?;

    assert!(matches!(engine.set("x", "y"), Err(EngineError::Closed)));
    assert!(matches!(engine.delete("k"), Err(EngineError::Closed)));
    assert!(matches!(engine.get("k"), Err(EngineError::Closed)));
    assert!(matches!(engine.compact(), Err(EngineError::Closed)));

    // close is idempotent
    engine.close()?;
    Ok(())
}

#[test]
fn close_persists_memtable_contents() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path(), 1_000);
        engine.set("durable", "yes")?;
        engine.close()?;
    }
    assert!(super::count_run_files(dir.path()) >= 1);

    let engine = open_engine(dir.path(), 1_000);
    assert_eq!(engine.get("durable")?.as_deref(), Some("yes"));
    Ok(())
}

#[test]
fn wal_disabled_engine_still_serves_reads_and_writes() -> Result<()> {
    let dir = tempdir()?;
    let config = crate::EngineConfig {
        enable_wal: false,
        ..test_config()
    };
    let engine = Engine::open(dir.path(), config)?;

    engine.set("k", "v")?;
    assert_eq!(engine.get("k")?.as_deref(), Some("v"));
    assert!(!dir.path().join(crate::WAL_FILE_NAME).exists());
    engine.close()?;
    Ok(())
}

#[test]
fn concurrent_writers_and_readers() -> Result<()> {
    let dir = tempdir()?;
    let engine = std::sync::Arc::new(open_engine(dir.path(), 50));

    let mut handles = Vec::new();
    for t in 0..4 {
        let engine = std::sync::Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            for i in 0..100 {
                let key = format!("t{t}-k{i:03}");
                engine.set(&key, "v").unwrap();
                assert_eq!(engine.get(&key).unwrap().as_deref(), Some("v"));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        for i in 0..100 {
            let key = format!("t{t}-k{i:03}");
            assert_eq!(engine.get(&key)?.as_deref(), Some("v"), "{key} lost");
        }
    }
    Ok(())
}
