//! Error types for the capture database.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem failure on open, append, fsync, or read.
    #[error("column store i/o: {0}")]
    Io(#[from] std::io::Error),

    /// `fetch` past the end of the store.
    #[error("row {id} out of range (row count is {row_count})")]
    OutOfRange { id: u64, row_count: u64 },

    /// Name longer than the u16 length prefix allows, or undecodable bytes
    /// found in `name.col`.
    #[error("invalid function name: {0}")]
    InvalidName(String),

    /// A second handle was opened over a directory this process already owns.
    #[error("database already open at {}", .0.display())]
    AlreadyOpen(PathBuf),
}
