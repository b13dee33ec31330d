//! Transparent timing wrapper for instrumented functions.

use std::sync::Once;

use tracing::{debug, warn};

use crate::clock::monotonic_ns;
use crate::config::capture_enabled;
use crate::db::{Database, global};

/// Runs `f` and records one capture row against the process-wide database.
///
/// The wrapper is transparent: `f`'s return value passes through unchanged,
/// and capture happens on the exit boundary via a drop guard, so a row is
/// recorded even when `f` panics and the panic propagates unchanged. With
/// `KRONICLER_ENABLED=false` the closure is called directly, with no clock
/// reads and no database construction.
pub fn observe<T>(name: &str, f: impl FnOnce() -> T) -> T {
    if !capture_enabled() {
        return f();
    }
    match global() {
        Ok(db) => {
            let _guard = CaptureGuard::begin(db, name);
            f()
        }
        Err(e) => {
            static WARNED: Once = Once::new();
            WARNED.call_once(|| warn!("capture disabled: database failed to open: {e}"));
            f()
        }
    }
}

/// Records the span from construction to drop as one capture row.
///
/// For instrumenting scopes that are not a single closure call, or for
/// embedders holding their own [`Database`] handle.
pub struct CaptureGuard<'a> {
    db: &'a Database,
    name: &'a str,
    arg_count: usize,
    start_ns: i64,
}

impl<'a> CaptureGuard<'a> {
    /// Starts timing now; the row is recorded when the guard drops.
    pub fn begin(db: &'a Database, name: &'a str) -> Self {
        Self {
            db,
            name,
            arg_count: 0,
            start_ns: monotonic_ns(),
        }
    }

    /// Like [`begin`](Self::begin), also recording the call's argument arity.
    pub fn with_args(db: &'a Database, name: &'a str, arg_count: usize) -> Self {
        Self {
            db,
            name,
            arg_count,
            start_ns: monotonic_ns(),
        }
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        let end_ns = monotonic_ns();
        if let Err(e) = self.db.capture(self.name, self.arg_count, self.start_ns, end_ns) {
            debug!("capture of {} failed: {e}", self.name);
        }
    }
}
