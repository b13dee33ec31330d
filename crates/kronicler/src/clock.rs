//! Monotonic nanosecond clock for producers.

use std::sync::OnceLock;
use std::time::Instant;

/// Nanoseconds since the first call in this process, from a monotonic source.
///
/// The store never interprets timestamps, so any monotonic producer clock
/// works; this one is the default used by [`observe`](crate::observe) and the
/// middleware adapters. Values from different processes are not comparable.
pub fn monotonic_ns() -> i64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as i64
}
