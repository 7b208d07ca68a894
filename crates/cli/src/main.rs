//! # CLI - SiltKV interactive shell
//!
//! A REPL over the storage engine. Reads commands from stdin, executes
//! them against the engine, and prints results to stdout. Works both
//! interactively and scripted (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value      Insert or update a key-value pair
//! GET key            Look up a key (prints value or "(nil)")
//! DEL key            Delete a key (writes a tombstone)
//! FLUSH              Force the memtable out to a run file
//! COMPACT            Run one compaction pass now
//! STATS              Print engine counters
//! HELP               Print the command summary
//! EXIT / QUIT        Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings come from environment variables:
//!
//! ```text
//! SILT_DATA_DIR          Data directory                  (default: "data")
//! SILT_FLUSH_THRESHOLD   Flush threshold in entries      (default: 8000)
//! SILT_COMPACT_EVERY_MS  Compaction tick period          (default: 60000)
//! SILT_WAL               Enable the write-ahead log      (default: "true")
//! SILT_WAL_SYNC_MS       Max ms between WAL fsyncs       (default: 1000)
//! ```
//!
//! Set `RUST_LOG=info` to watch flushes and compactions happen.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use engine::{Engine, EngineConfig};
use tracing_subscriber::EnvFilter;

const COMMAND_SUMMARY: &str =
    "Commands: SET key value | GET key | DEL key | FLUSH | COMPACT | STATS | HELP | EXIT";

/// Reads a configuration value from the environment, falling back to
/// `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let data_dir = env_or("SILT_DATA_DIR", "data");
    let flush_threshold: usize = env_or("SILT_FLUSH_THRESHOLD", "8000")
        .parse()
        .unwrap_or(8000);
    let compaction_interval_ms: u64 = env_or("SILT_COMPACT_EVERY_MS", "60000")
        .parse()
        .unwrap_or(60_000);
    let enable_wal: bool = env_or("SILT_WAL", "true").parse().unwrap_or(true);
    let wal_sync_interval_ms: u64 = env_or("SILT_WAL_SYNC_MS", "1000").parse().unwrap_or(1_000);

    let config = EngineConfig {
        flush_threshold,
        compaction_interval_ms,
        enable_wal,
        wal_sync_interval_ms,
        ..EngineConfig::default()
    };
    let engine = Engine::open(&data_dir, config)?;

    println!(
        "SiltKV started (dir={}, flush_threshold={}, wal={})",
        data_dir, flush_threshold, enable_wal
    );
    println!("{COMMAND_SUMMARY}");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(key) = parts.next() {
                        let value: String = parts.collect::<Vec<&str>>().join(" ");
                        if value.is_empty() {
                            println!("ERR usage: SET key value");
                        } else {
                            match engine.set(key, &value) {
                                Ok(()) => println!("OK"),
                                Err(e) => println!("ERR set failed: {e}"),
                            }
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(key) = parts.next() {
                        match engine.get(key) {
                            Ok(Some(value)) => println!("{value}"),
                            Ok(None) => println!("(nil)"),
                            Err(e) => println!("ERR read failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "DEL" => {
                    if let Some(key) = parts.next() {
                        match engine.delete(key) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR del failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "FLUSH" => match engine.flush() {
                    Ok(()) => println!("OK (runs={})", engine.run_count()),
                    Err(e) => println!("ERR flush failed: {e}"),
                },
                "COMPACT" => match engine.compact() {
                    Ok(ran) => {
                        if ran {
                            println!("OK (runs={})", engine.run_count());
                        } else {
                            println!("SKIPPED (busy or nothing to merge)");
                        }
                    }
                    Err(e) => println!("ERR compact failed: {e}"),
                },
                "STATS" => {
                    let stats = engine.stats();
                    println!(
                        "memtable_entries={} runs={} run_bytes={} reads={} writes={}",
                        stats.memtable_entries,
                        stats.run_count,
                        stats.run_bytes,
                        stats.total_reads,
                        stats.total_writes
                    );
                }
                "HELP" => {
                    println!("{COMMAND_SUMMARY}");
                }
                "EXIT" | "QUIT" => {
                    break;
                }
                other => {
                    println!("unknown command: {other}");
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    engine.close()?;
    println!("bye");
    Ok(())
}
