//! Columnar persistence: parallel append-only column files and their models.

pub mod model;
pub mod store;

pub use model::Row;
pub use store::{ColumnStore, RowIter};
