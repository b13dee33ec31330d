//! Column-local reductions over the store.
//!
//! Nothing here reconstructs rows. `average` is a two-pass scan: pass one
//! walks `name.col` collecting matching row indices, pass two gathers
//! `delta.col` at exactly those indices. The sum accumulates in i128 so
//! millions of i64 deltas cannot overflow; only the final division happens
//! in f64.

use crate::error::Result;
use crate::storage::store::ColumnStore;

/// Mean `delta_ns` across rows with the given name, `0.0` when the name
/// never occurs. Negative deltas participate as ordinary values.
pub fn average(store: &ColumnStore, name: &str) -> Result<f64> {
    let matches = store.matching_rows(name)?;
    if matches.is_empty() {
        return Ok(0.0);
    }
    let (sum, count) = store.delta_sum_at(&matches)?;
    Ok(sum as f64 / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn average_is_conditioned_on_name() {
        let dir = tempdir().unwrap();
        let store = ColumnStore::open(dir.path(), 64).unwrap();
        store.append("foo", 0, 10).unwrap();
        store.append("bar", 10, 20).unwrap();
        store.append("foo", 30, 40).unwrap();

        assert_eq!(average(&store, "foo").unwrap(), 25.0);
        assert_eq!(average(&store, "bar").unwrap(), 20.0);
    }

    #[test]
    fn absent_name_averages_to_zero() {
        let dir = tempdir().unwrap();
        let store = ColumnStore::open(dir.path(), 64).unwrap();
        store.append("foo", 0, 10).unwrap();

        assert_eq!(average(&store, "baz").unwrap(), 0.0);
    }

    #[test]
    fn negative_deltas_are_ordinary_values() {
        let dir = tempdir().unwrap();
        let store = ColumnStore::open(dir.path(), 64).unwrap();
        // Clock glitches land in the store verbatim and show up in the mean.
        store.append("glitchy", 100, -50).unwrap();
        store.append("glitchy", 200, 150).unwrap();

        assert_eq!(average(&store, "glitchy").unwrap(), 50.0);
    }

    #[test]
    fn mean_is_exact_integer_sum_divided_once() {
        let dir = tempdir().unwrap();
        let store = ColumnStore::open(dir.path(), 1024).unwrap();
        let mut sum: i64 = 0;
        for i in 0..10_000i64 {
            let delta = 100 + (i % 101);
            store.append("jake", i, delta).unwrap();
            sum += delta;
        }

        let expected = sum as f64 / 10_000.0;
        assert_eq!(average(&store, "jake").unwrap(), expected);
    }
}
