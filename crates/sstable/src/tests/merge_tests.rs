use std::sync::Arc;
use tempfile::tempdir;

use record::Record;

use super::{rec, tomb, write_run};
use crate::{MergeIterator, RunReader};

fn open_runs(dir: &std::path::Path, runs: &[&[Record]]) -> Vec<Arc<RunReader>> {
    // index 0 is treated as the newest run by the merge
    runs.iter()
        .enumerate()
        .map(|(i, records)| {
            let path = dir.join(format!("run_{:06}.dat", i + 1));
            write_run(&path, records);
            Arc::new(RunReader::open(&path).unwrap())
        })
        .collect()
}

fn drain(merge: &mut MergeIterator) -> Vec<Record> {
    let mut out = Vec::new();
    while let Some(record) = merge.next_entry().unwrap() {
        out.push(record);
    }
    out
}

#[test]
fn merges_disjoint_runs_in_key_order() {
    let dir = tempdir().unwrap();
    let readers = open_runs(
        dir.path(),
        &[
            &[rec("b", "2", 10), rec("d", "4", 10)],
            &[rec("a", "1", 5), rec("c", "3", 5), rec("e", "5", 5)],
        ],
    );

    let mut merge = MergeIterator::new(&readers, false).unwrap();
    let keys: Vec<String> = drain(&mut merge)
        .iter()
        .map(|r| r.key().to_string())
        .collect();
    assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
}

#[test]
fn newest_timestamp_wins_per_key() {
    let dir = tempdir().unwrap();
    let readers = open_runs(
        dir.path(),
        &[
            &[rec("x", "new", 20)],
            &[rec("x", "old", 10), rec("y", "only", 1)],
        ],
    );

    let mut merge = MergeIterator::new(&readers, false).unwrap();
    let out = drain(&mut merge);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].key(), "x");
    assert_eq!(out[0].value(), Some("new"));
    assert_eq!(out[1].key(), "y");
}

#[test]
fn newest_wins_even_when_older_run_is_listed_first_in_heap_order() {
    // the older version lives in the newer file position's sibling; the
    // timestamp, not the source order, decides the winner
    let dir = tempdir().unwrap();
    let readers = open_runs(
        dir.path(),
        &[&[rec("k", "stale", 5)], &[rec("k", "fresh", 9)]],
    );

    let mut merge = MergeIterator::new(&readers, false).unwrap();
    let out = drain(&mut merge);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value(), Some("fresh"));
}

#[test]
fn equal_key_and_timestamp_resolves_to_newer_run() {
    let dir = tempdir().unwrap();
    let readers = open_runs(
        dir.path(),
        &[&[rec("k", "from-newer-run", 7)], &[rec("k", "from-older-run", 7)]],
    );

    let mut merge = MergeIterator::new(&readers, false).unwrap();
    let out = drain(&mut merge);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value(), Some("from-newer-run"));
}

#[test]
fn tombstones_preserved_when_drop_disabled() {
    let dir = tempdir().unwrap();
    let readers = open_runs(
        dir.path(),
        &[&[tomb("k", 20)], &[rec("k", "v", 10), rec("live", "yes", 10)]],
    );

    let mut merge = MergeIterator::new(&readers, false).unwrap();
    let out = drain(&mut merge);
    assert_eq!(out.len(), 2);
    assert!(out[0].is_tombstone());
    assert_eq!(out[0].key(), "k");
    assert_eq!(out[1].key(), "live");
}

#[test]
fn tombstones_dropped_when_drop_enabled() {
    let dir = tempdir().unwrap();
    let readers = open_runs(
        dir.path(),
        &[&[tomb("k", 20)], &[rec("k", "v", 10), rec("live", "yes", 10)]],
    );

    let mut merge = MergeIterator::new(&readers, true).unwrap();
    let out = drain(&mut merge);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].key(), "live");
}

#[test]
fn tombstone_does_not_survive_if_put_is_newer() {
    // a re-insert after a delete must resurrect the key
    let dir = tempdir().unwrap();
    let readers = open_runs(
        dir.path(),
        &[&[rec("k", "back", 30)], &[tomb("k", 20)], &[rec("k", "v1", 10)]],
    );

    let mut merge = MergeIterator::new(&readers, true).unwrap();
    let out = drain(&mut merge);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value(), Some("back"));
}
