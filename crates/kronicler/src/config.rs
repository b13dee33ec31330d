//! Database configuration and the process-wide capture toggle.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Default data directory, created under the working directory.
pub const DEFAULT_DIRECTORY: &str = ".kronicler_data";

/// Default capacity of the async capture queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 65_536;

/// Default number of appends between fsyncs. Files are always synced on
/// close and on [`Database::flush`](crate::Database::flush).
pub const DEFAULT_FSYNC_EVERY: u64 = 1024;

/// Environment variable that disables all capture when set to `"0"` or
/// `"false"` (case-insensitive).
pub const ENABLED_ENV: &str = "KRONICLER_ENABLED";

/// Settings for [`Database::open`](crate::Database::open).
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the column files.
    pub directory: PathBuf,
    /// When true, `capture` appends on the caller's thread and surfaces i/o
    /// errors. When false, events go through a bounded queue to a background
    /// consumer and the caller never blocks on i/o.
    pub sync_consume: bool,
    /// Capacity of the async queue. When full, the newest event is dropped
    /// and counted; producers are never blocked.
    pub queue_capacity: usize,
    /// Appends between fsyncs.
    pub fsync_every: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            sync_consume: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            fsync_every: DEFAULT_FSYNC_EVERY,
        }
    }
}

impl Config {
    /// Default settings over a custom directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn sync_consume(mut self, sync_consume: bool) -> Self {
        self.sync_consume = sync_consume;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn fsync_every(mut self, every: u64) -> Self {
        self.fsync_every = every;
        self
    }
}

/// Whether capture is enabled for this process.
///
/// Read once from [`ENABLED_ENV`] and cached, so the disabled path stays an
/// identity wrapper with no per-call environment access.
pub fn capture_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| match env::var(ENABLED_ENV) {
        Ok(value) => !is_disabled_value(&value),
        Err(_) => true,
    })
}

fn is_disabled_value(value: &str) -> bool {
    value == "0" || value.eq_ignore_ascii_case("false")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_values() {
        assert!(is_disabled_value("0"));
        assert!(is_disabled_value("false"));
        assert!(is_disabled_value("FALSE"));
        assert!(is_disabled_value("False"));
        assert!(!is_disabled_value("1"));
        assert!(!is_disabled_value("true"));
        assert!(!is_disabled_value(""));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::new("/tmp/captures")
            .sync_consume(true)
            .queue_capacity(8)
            .fsync_every(1);

        assert_eq!(config.directory, PathBuf::from("/tmp/captures"));
        assert!(config.sync_consume);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.fsync_every, 1);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.directory, PathBuf::from(DEFAULT_DIRECTORY));
        assert!(!config.sync_consume);
        assert_eq!(config.queue_capacity, 65_536);
    }
}
