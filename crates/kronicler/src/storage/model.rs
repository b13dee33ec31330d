//! Row and event models shared by the store and the pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum length of a stored function name in bytes (u16 length prefix).
pub const MAX_NAME_BYTES: usize = u16::MAX as usize;

/// One observation of a function or HTTP handler invocation, reconstructed
/// from the parallel columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Row number assigned by the store at append time, starting at 0.
    pub id: u64,
    /// Function name or request path, stored verbatim.
    pub name: String,
    /// Producer-supplied monotonic timestamp. The store does not interpret it.
    pub start_ns: i64,
    /// Duration in nanoseconds. Negative values are stored as produced.
    pub delta_ns: i64,
}

/// A capture accepted by the pipeline but not yet appended.
#[derive(Debug, Clone)]
pub(crate) struct CaptureEvent {
    pub name: String,
    pub start_ns: i64,
    pub delta_ns: i64,
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_BYTES {
        return Err(Error::InvalidName(format!(
            "name is {} bytes, limit is {MAX_NAME_BYTES}",
            name.len()
        )));
    }
    Ok(())
}
