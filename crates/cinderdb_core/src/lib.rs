//! # cinderdb
//!
//! An embedded, persistent key-value store for workloads dominated by
//! point reads and writes, where the keys (but not the values) fit in
//! memory.
//!
//! The store is log-structured: every write appends to a rolling segment
//! file, a compact in-memory [`KeyDirectory`] maps each live key to the
//! exact on-disk location of its current value, and a background
//! compactor rewrites segments whose live fraction has fallen below a
//! threshold.
//!
//! ## Layout on disk
//!
//! A store is a single directory of `<id>.data` segments, their paired
//! `<id>.index` files (one entry per record, enabling directory
//! reconstruction without reading values), and `<id>.tombstone` deletion
//! logs. Recovery replays index and tombstone files by sequence number
//! before the store accepts traffic.
//!
//! ## Example
//!
//! ```no_run
//! use cinderdb_core::{Options, Store};
//! use std::path::Path;
//!
//! let store = Store::open(Path::new("my_store"), Options::default())?;
//!
//! store.put(b"user:1", b"ada")?;
//! assert_eq!(store.get(b"user:1")?, Some(b"ada".to_vec()));
//!
//! store.delete(b"user:1")?;
//! assert_eq!(store.get(b"user:1")?, None);
//!
//! store.close()?;
//! # Ok::<(), cinderdb_core::StoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compaction;
mod config;
mod dir;
mod directory;
mod error;
mod rate_limiter;
mod recovery;
pub mod segment;
mod stats;
mod store;
mod types;

pub use config::Options;
pub use dir::StoreDir;
pub use directory::KeyDirectory;
pub use error::{StoreError, StoreResult};
pub use stats::{MetricsSink, NoopMetrics, Operation, StatsSnapshot, StoreStats};
pub use store::Store;
pub use types::{FileId, RecordMetadata, SequenceNumber};
