//! kronicler — an embedded columnar capture database for in-process
//! function profiling.
//!
//! Producers hand `(name, arg_count, start_ns, end_ns)` to
//! [`Database::capture`]; each observation lands in four parallel
//! append-only column files. Readers fetch raw rows or compute column-local
//! aggregates (`contains_name`, `average`) that never reconstruct a joined
//! row set: an aggregate touches only the columns its predicate names.
//!
//! Provides:
//! - `storage` — column files, recovery, row model
//! - `aggregate` — column-local reductions
//! - `db` — the [`Database`] handle and the process-wide singleton
//! - `observe` — transparent timing wrapper and drop guard
//! - `config` — settings and the `KRONICLER_ENABLED` toggle
//! - `clock` — monotonic nanosecond clock for producers
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! embedder's choice.

pub mod aggregate;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod observe;
pub mod storage;

mod pipeline;

pub use clock::monotonic_ns;
pub use config::{Config, capture_enabled};
pub use db::{Database, global, init};
pub use error::{Error, Result};
pub use observe::{CaptureGuard, observe};
pub use storage::model::Row;
pub use storage::store::RowIter;
