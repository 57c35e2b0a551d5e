//! # morphkv
//!
//! An embeddable, **adaptive** in-memory key-value store. The backing hash
//! table is not fixed at construction time: a supervisor watches live
//! workload counters (insert/lookup ratio, load factor, tombstone
//! accumulation) and migrates entries between two concrete table engines
//! while the store keeps serving operations.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Store                             │
//! │  ┌─────────────────┐            ┌─────────────────────┐   │
//! │  │  Chaining       │  migrate   │  Robin Hood         │   │
//! │  │  engine         │ ◄────────► │  engine             │   │
//! │  │  (bucket lists) │  (batched) │  (slots+tombstones) │   │
//! │  └────────┬────────┘            └──────────┬──────────┘   │
//! │           │        counter deltas          │              │
//! │           └──────────►  Metrics  ◄─────────┘              │
//! │                           │                               │
//! │                policy (window ratios, hysteresis)         │
//! │                                                           │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │  Snapshot codec (ADHSNAP1 frame, BLAKE2b-256, gzip) │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store`] | Public facade — open, read, write, snapshot, tick, trace |
//! | [`table`] | The two table engines and their shared entry types |
//! | [`hash`] | Seeded 64-bit key hashing and key display canonicalization |
//! | [`metrics`] | Per-engine counters, gauges, and the probe-length histogram |
//! | [`snapshot`] | Framed, checksummed, optionally compressed dump/restore |
//! | [`trace`] | Read-only probe recorder for diagnostics |
//! | [`encoding`] | Deterministic binary wire format for snapshot payloads |
//!
//! ## Key features
//!
//! - **Workload-adaptive layout** — a policy engine switches between
//!   separate chaining (write-friendly) and Robin Hood open addressing
//!   (lookup-friendly), with hysteresis to prevent flapping.
//! - **Incremental migration** — engine switches move entries in small
//!   batches piggybacked on regular operations; every key stays readable
//!   throughout, and a migration can be cancelled at any batch boundary.
//! - **Tombstone hygiene** — Robin Hood deletions leave probe chains
//!   intact; compaction reclaims tombstones as soon as a mutator observes
//!   the configured ratio.
//! - **Tamper-evident snapshots** — a fixed `ADHSNAP1` frame with a
//!   BLAKE2b-256 checksum over the stored payload, an optional gzip layer,
//!   and size caps enforced before and after decompression.
//! - **Single-writer by construction** — mutators take `&mut self`; reads,
//!   traces, and dumps hold shared borrows.
//!
//! ## Quick start
//!
//! ```rust
//! use morphkv::{Mode, PutResult, Store, StoreConfig};
//!
//! let config = StoreConfig {
//!     mode: Mode::Adaptive,
//!     initial_capacity: 64,
//!     ..StoreConfig::default()
//! };
//! let mut store = Store::open(config).unwrap();
//!
//! // Write
//! assert_eq!(
//!     store.put(b"hello".to_vec(), b"world".to_vec()).unwrap(),
//!     PutResult::Inserted
//! );
//!
//! // Read
//! assert_eq!(store.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! assert_eq!(store.delete(b"hello").unwrap(), Some(b"world".to_vec()));
//! assert_eq!(store.get(b"hello").unwrap(), None);
//!
//! // Observe
//! let tick = store.tick();
//! assert_eq!(tick.counters.puts_total, 1);
//! ```

pub mod encoding;
pub mod hash;
pub mod metrics;
pub mod snapshot;
pub mod store;
pub mod table;
pub mod trace;

pub use metrics::{Counters, Gauges, MetricsTick};
pub use snapshot::SnapshotError;
pub use store::{CancelToken, Mode, Store, StoreConfig, StoreError};
pub use table::{EngineKind, PutResult};
pub use trace::{ProbeTrace, TraceOp, TraceState, TraceStep, TraceTerminal};
