//! # Sorted runs - immutable on-disk storage for the SiltKV engine
//!
//! When the engine's in-memory table fills up it is flushed to disk as a
//! *sorted run*: a write-once file holding key-ascending records with an
//! internal index. Runs are never modified after publication, only
//! replaced during compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (key-ascending records)                          │
//! │                                                               │
//! │ key_len (u32) | key | val_len (u32) | val                     │
//! │ tombstone (u8) | timestamp (i64)                              │
//! │                                                               │
//! │ ... repeated for each entry ...                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION (key -> data offset, one entry per record)      │
//! │                                                               │
//! │ key_len (u32) | key | offset (i64)                            │
//! ├───────────────────────────────────────────────────────────────┤
//! │ index_offset (i64)   byte offset of the index section start   │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER                                                        │
//! │                                                               │
//! │ entry_count (u32)                                             │
//! │ min_key_len (u32) | min_key                                   │
//! │ max_key_len (u32) | max_key                                   │
//! │ created_ms (i64)                                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ footer_len (u32)     always the last 4 bytes of the file      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. Readers locate the footer by reading the
//! trailing `footer_len`, seeking back `footer_len + 4` bytes for the
//! footer fields, then a further 8 bytes for `index_offset`. Keeping the
//! footer length on disk (instead of assuming a fixed size) makes the
//! trailer robust against arbitrarily long min/max keys.
//!
//! ## Modules
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | [`format`]  | Trailer encode/decode, run file naming               |
//! | [`writer`]  | Streaming [`RunWriter`] with `finish`/`cancel`       |
//! | [`reader`]  | [`RunReader`] point lookups and forward iteration    |
//! | [`catalog`] | [`Catalog`] of live runs, reader cache, tier grouping|
//! | [`merge`]   | [`MergeIterator`] k-way merge for compaction         |

pub mod catalog;
pub mod format;
pub mod merge;
pub mod reader;
pub mod writer;

pub use catalog::Catalog;
pub use format::RunMeta;
pub use merge::MergeIterator;
pub use reader::{RunIter, RunReader};
pub use writer::RunWriter;

use record::CodecError;
use std::io;
use thiserror::Error;

/// Errors surfaced by run-file operations.
#[derive(Debug, Error)]
pub enum RunError {
    /// An underlying filesystem error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file does not hold a well-formed run.
    #[error("corrupt run file: {0}")]
    Corrupt(String),
}

impl From<CodecError> for RunError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io) => RunError::Io(io),
            CodecError::Corrupt(msg) => RunError::Corrupt(msg.to_string()),
        }
    }
}

#[cfg(test)]
mod tests;
