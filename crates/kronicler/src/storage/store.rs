//! Append-only column files with recovery-by-truncation.
//!
//! On-disk layout inside the data directory:
//!
//! ```text
//! id.col     u64 row id, little-endian, 8 bytes per row
//! start.col  i64 start timestamp (ns), 8 bytes per row
//! delta.col  i64 duration (ns), 8 bytes per row
//! name.col   {u16 length}{bytes[length]} per row, variable width
//! name.idx   u64 byte offset of each row's name.col record
//! ```
//!
//! There is no header: row count is file length over record size for the
//! fixed columns, and `name.idx` gives O(1) random access into `name.col`.
//! Records are never rewritten. A row becomes visible to readers only after
//! every file carries it, by publishing the new row count last.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::storage::model::{Row, validate_name};

pub(crate) const ID_FILE: &str = "id.col";
pub(crate) const NAME_FILE: &str = "name.col";
pub(crate) const NAME_IDX_FILE: &str = "name.idx";
pub(crate) const START_FILE: &str = "start.col";
pub(crate) const DELTA_FILE: &str = "delta.col";

/// Record size of the fixed-width columns and of `name.idx`.
const FIXED_RECORD: u64 = 8;

/// Write handles for all five files, guarded by the single writer lock.
struct Writers {
    id: File,
    name: File,
    name_idx: File,
    start: File,
    delta: File,
    /// Byte length of `name.col`; the offset the next name record lands at.
    name_bytes: u64,
    /// Appends since the last fsync.
    unsynced: u64,
}

/// Durable, ordered storage for the four parallel columns.
pub struct ColumnStore {
    dir: PathBuf,
    writers: RwLock<Writers>,
    /// Published row count. Stored only after a full row is on disk, so a
    /// reader that observes `n` can read every column of rows `0..n`.
    row_count: AtomicU64,
    fsync_every: u64,
}

impl ColumnStore {
    /// Opens or creates the column files under `dir`, truncating any partial
    /// row left behind by an unclean shutdown.
    pub fn open(dir: impl Into<PathBuf>, fsync_every: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let rows = recover(&dir)?;

        let id = open_column(&dir.join(ID_FILE))?;
        let name = open_column(&dir.join(NAME_FILE))?;
        let name_idx = open_column(&dir.join(NAME_IDX_FILE))?;
        let start = open_column(&dir.join(START_FILE))?;
        let delta = open_column(&dir.join(DELTA_FILE))?;
        let name_bytes = name.metadata()?.len();

        Ok(Self {
            dir,
            writers: RwLock::new(Writers {
                id,
                name,
                name_idx,
                start,
                delta,
                name_bytes,
                unsynced: 0,
            }),
            row_count: AtomicU64::new(rows),
            fsync_every: fsync_every.max(1),
        })
    }

    /// Appends one row to all columns and returns its id.
    ///
    /// Writes land in OS buffers immediately; every `fsync_every` appends the
    /// files are also synced. A failed append leaves the published row count
    /// untouched and rolls the files back to their previous lengths.
    pub fn append(&self, name: &str, start_ns: i64, delta_ns: i64) -> Result<u64> {
        validate_name(name)?;

        let mut w = self.writers.write();
        let id = self.row_count.load(Ordering::Relaxed);
        let name_off = w.name_bytes;

        if let Err(e) = write_row(&mut w, id, name, start_ns, delta_ns) {
            rollback(&mut w, id, name_off);
            return Err(e.into());
        }

        w.name_bytes = name_off + 2 + name.len() as u64;
        w.unsynced += 1;
        if w.unsynced >= self.fsync_every {
            if let Err(e) = sync_writers(&w) {
                warn!("fsync after append failed: {e}");
            }
            w.unsynced = 0;
        }

        self.row_count.store(id + 1, Ordering::Release);
        Ok(id)
    }

    /// Reconstructs one row by reading a single record from each column.
    pub fn fetch(&self, id: u64) -> Result<Row> {
        let row_count = self.row_count();
        if id >= row_count {
            return Err(Error::OutOfRange { id, row_count });
        }
        let _readers = self.writers.read();

        let mut id_col = File::open(self.dir.join(ID_FILE))?;
        let stored_id = read_u64_at(&mut id_col, id * FIXED_RECORD)?;

        let mut idx = File::open(self.dir.join(NAME_IDX_FILE))?;
        let offset = read_u64_at(&mut idx, id * FIXED_RECORD)?;
        let mut name_col = File::open(self.dir.join(NAME_FILE))?;
        let len = read_u16_at(&mut name_col, offset)? as usize;
        let mut buf = vec![0u8; len];
        name_col.read_exact(&mut buf)?;
        let name = String::from_utf8(buf)
            .map_err(|_| Error::InvalidName(format!("undecodable bytes in name.col at row {id}")))?;

        let mut start_col = File::open(self.dir.join(START_FILE))?;
        let start_ns = read_i64_at(&mut start_col, id * FIXED_RECORD)?;
        let mut delta_col = File::open(self.dir.join(DELTA_FILE))?;
        let delta_ns = read_i64_at(&mut delta_col, id * FIXED_RECORD)?;

        Ok(Row {
            id: stored_id,
            name,
            start_ns,
            delta_ns,
        })
    }

    /// Lazy scan over all rows visible right now, in id order.
    ///
    /// Rows are never rewritten, so the iterator reads a stable prefix
    /// without holding the store lock; rows appended later are not yielded.
    /// Call again for a fresh scan.
    pub fn rows(&self) -> Result<RowIter> {
        Ok(RowIter {
            remaining: self.row_count(),
            id: BufReader::new(File::open(self.dir.join(ID_FILE))?),
            name: BufReader::new(File::open(self.dir.join(NAME_FILE))?),
            start: BufReader::new(File::open(self.dir.join(START_FILE))?),
            delta: BufReader::new(File::open(self.dir.join(DELTA_FILE))?),
        })
    }

    /// Sequential scan of `name.col` only; true on the first match.
    pub fn contains_name(&self, name: &str) -> Result<bool> {
        let row_count = self.row_count();
        let _readers = self.writers.read();
        let mut names = NameScanner::open(&self.dir)?;
        for _ in 0..row_count {
            if names.next_is(name.as_bytes())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Indices of rows whose name equals `name`, touching only `name.col`.
    pub fn matching_rows(&self, name: &str) -> Result<Vec<u64>> {
        let row_count = self.row_count();
        let _readers = self.writers.read();
        let mut names = NameScanner::open(&self.dir)?;
        let mut matches = Vec::new();
        for row in 0..row_count {
            if names.next_is(name.as_bytes())? {
                matches.push(row);
            }
        }
        Ok(matches)
    }

    /// Gathers `delta.col` at the given ascending row indices, accumulating
    /// in i128 so the sum cannot overflow across millions of rows.
    pub fn delta_sum_at(&self, rows: &[u64]) -> Result<(i128, u64)> {
        let _readers = self.writers.read();
        let mut delta_col = File::open(self.dir.join(DELTA_FILE))?;
        let mut sum: i128 = 0;
        for &row in rows {
            sum += i128::from(read_i64_at(&mut delta_col, row * FIXED_RECORD)?);
        }
        Ok((sum, rows.len() as u64))
    }

    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::Acquire)
    }

    /// Forces all column files to disk.
    pub fn sync(&self) -> Result<()> {
        let mut w = self.writers.write();
        sync_writers(&w)?;
        w.unsynced = 0;
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }
}

/// Lazy, restartable iterator over whole rows. See [`ColumnStore::rows`].
pub struct RowIter {
    remaining: u64,
    id: BufReader<File>,
    name: BufReader<File>,
    start: BufReader<File>,
    delta: BufReader<File>,
}

impl RowIter {
    fn read_row(&mut self) -> Result<Row> {
        let mut word = [0u8; 8];
        self.id.read_exact(&mut word)?;
        let id = u64::from_le_bytes(word);

        let mut len_buf = [0u8; 2];
        self.name.read_exact(&mut len_buf)?;
        let mut buf = vec![0u8; u16::from_le_bytes(len_buf) as usize];
        self.name.read_exact(&mut buf)?;
        let name = String::from_utf8(buf)
            .map_err(|_| Error::InvalidName(format!("undecodable bytes in name.col at row {id}")))?;

        self.start.read_exact(&mut word)?;
        let start_ns = i64::from_le_bytes(word);
        self.delta.read_exact(&mut word)?;
        let delta_ns = i64::from_le_bytes(word);

        Ok(Row {
            id,
            name,
            start_ns,
            delta_ns,
        })
    }
}

impl Iterator for RowIter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.read_row() {
            Ok(row) => Some(Ok(row)),
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

/// Forward-only reader over `name.col` records.
struct NameScanner {
    reader: BufReader<File>,
    buf: Vec<u8>,
}

impl NameScanner {
    fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(dir.join(NAME_FILE))?),
            buf: Vec::new(),
        })
    }

    /// Advances one record and compares it to `target`. Records of a
    /// different length are skipped without copying their bytes.
    fn next_is(&mut self, target: &[u8]) -> Result<bool> {
        let mut len_buf = [0u8; 2];
        self.reader.read_exact(&mut len_buf)?;
        let len = u16::from_le_bytes(len_buf) as usize;
        if len != target.len() {
            self.reader.seek_relative(len as i64)?;
            return Ok(false);
        }
        self.buf.resize(len, 0);
        self.reader.read_exact(&mut self.buf)?;
        Ok(self.buf == target)
    }
}

fn open_column(path: &Path) -> std::io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    file.seek(SeekFrom::End(0))?;
    Ok(file)
}

fn write_row(w: &mut Writers, id: u64, name: &str, start_ns: i64, delta_ns: i64) -> std::io::Result<()> {
    w.id.write_all(&id.to_le_bytes())?;
    w.name_idx.write_all(&w.name_bytes.to_le_bytes())?;
    w.name.write_all(&(name.len() as u16).to_le_bytes())?;
    w.name.write_all(name.as_bytes())?;
    w.start.write_all(&start_ns.to_le_bytes())?;
    w.delta.write_all(&delta_ns.to_le_bytes())?;
    Ok(())
}

/// Best-effort removal of a partially written row. Anything this cannot undo
/// is repaired by recovery on the next open.
fn rollback(w: &mut Writers, rows: u64, name_off: u64) {
    let fixed = rows * FIXED_RECORD;
    for (file, len) in [
        (&mut w.id, fixed),
        (&mut w.name_idx, fixed),
        (&mut w.start, fixed),
        (&mut w.delta, fixed),
        (&mut w.name, name_off),
    ] {
        if truncate_and_reseek(file, len).is_err() {
            debug!("rollback truncation failed; next open will repair");
        }
    }
}

fn truncate_and_reseek(file: &mut File, len: u64) -> std::io::Result<()> {
    file.set_len(len)?;
    file.seek(SeekFrom::End(0))?;
    Ok(())
}

fn sync_writers(w: &Writers) -> std::io::Result<()> {
    w.id.sync_data()?;
    w.name.sync_data()?;
    w.name_idx.sync_data()?;
    w.start.sync_data()?;
    w.delta.sync_data()?;
    Ok(())
}

/// Truncates every column to the largest row count all files fully cover and
/// returns that count.
fn recover(dir: &Path) -> Result<u64> {
    let id_len = file_len(&dir.join(ID_FILE))?;
    let start_len = file_len(&dir.join(START_FILE))?;
    let delta_len = file_len(&dir.join(DELTA_FILE))?;
    let idx_len = file_len(&dir.join(NAME_IDX_FILE))?;
    let name_len = file_len(&dir.join(NAME_FILE))?;

    let mut rows = (id_len / FIXED_RECORD)
        .min(start_len / FIXED_RECORD)
        .min(delta_len / FIXED_RECORD)
        .min(idx_len / FIXED_RECORD);

    // Walk back until the last row's name record fits inside name.col.
    let mut name_end = 0u64;
    if rows > 0 && name_len > 0 {
        let mut idx = File::open(dir.join(NAME_IDX_FILE))?;
        let mut name = File::open(dir.join(NAME_FILE))?;
        while rows > 0 {
            let offset = read_u64_at(&mut idx, (rows - 1) * FIXED_RECORD)?;
            if offset + 2 <= name_len {
                let len = u64::from(read_u16_at(&mut name, offset)?);
                if offset + 2 + len <= name_len {
                    name_end = offset + 2 + len;
                    break;
                }
            }
            rows -= 1;
        }
    } else {
        rows = 0;
    }

    let fixed = rows * FIXED_RECORD;
    let truncated = id_len != fixed
        || start_len != fixed
        || delta_len != fixed
        || idx_len != fixed
        || name_len != name_end;
    if truncated {
        warn!(
            "column files disagree after unclean shutdown, truncating to {rows} rows"
        );
    }

    truncate_to(&dir.join(ID_FILE), id_len, fixed)?;
    truncate_to(&dir.join(START_FILE), start_len, fixed)?;
    truncate_to(&dir.join(DELTA_FILE), delta_len, fixed)?;
    truncate_to(&dir.join(NAME_IDX_FILE), idx_len, fixed)?;
    truncate_to(&dir.join(NAME_FILE), name_len, name_end)?;

    Ok(rows)
}

fn file_len(path: &Path) -> Result<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn truncate_to(path: &Path, current: u64, target: u64) -> Result<()> {
    if current != target {
        OpenOptions::new().write(true).open(path)?.set_len(target)?;
    }
    Ok(())
}

fn read_u64_at(file: &mut File, pos: u64) -> Result<u64> {
    let mut buf = [0u8; 8];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64_at(file: &mut File, pos: u64) -> Result<i64> {
    let mut buf = [0u8; 8];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_u16_at(file: &mut File, pos: u64) -> Result<u16> {
    let mut buf = [0u8; 2];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> ColumnStore {
        ColumnStore::open(dir, 4).unwrap()
    }

    #[test]
    fn append_assigns_sequential_ids() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        assert_eq!(store.append("foo", 100, 300).unwrap(), 0);
        assert_eq!(store.append("bar", 400, 20).unwrap(), 1);
        assert_eq!(store.append("foo", 500, 7).unwrap(), 2);
        assert_eq!(store.row_count(), 3);
    }

    #[test]
    fn fetch_round_trips_every_column() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store.append("alpha", 10, 5).unwrap();
        store.append("", -3, -1).unwrap();

        assert_eq!(
            store.fetch(0).unwrap(),
            Row {
                id: 0,
                name: "alpha".into(),
                start_ns: 10,
                delta_ns: 5,
            }
        );
        // Empty names and negative timestamps are stored verbatim.
        assert_eq!(
            store.fetch(1).unwrap(),
            Row {
                id: 1,
                name: "".into(),
                start_ns: -3,
                delta_ns: -1,
            }
        );
    }

    #[test]
    fn fetch_past_end_is_out_of_range() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.append("foo", 0, 1).unwrap();

        match store.fetch(1) {
            Err(Error::OutOfRange { id: 1, row_count: 1 }) => {}
            other => panic!("expected OutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn name_index_offsets_strictly_increase() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        for name in ["a", "", "long_function_name", "b"] {
            store.append(name, 0, 0).unwrap();
        }

        let idx = std::fs::read(dir.path().join(NAME_IDX_FILE)).unwrap();
        let offsets: Vec<u64> = idx
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(offsets.len(), 4);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn rows_iterator_is_restartable() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        for i in 0..10 {
            store.append("f", i, i * 2).unwrap();
        }

        let first: Vec<Row> = store.rows().unwrap().map(|r| r.unwrap()).collect();
        let second: Vec<Row> = store.rows().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(first.len(), 10);
        assert_eq!(first, second);
        assert_eq!(first[7].start_ns, 7);
    }

    #[test]
    fn scans_touch_only_requested_rows() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.append("foo", 0, 10).unwrap();
        store.append("bar", 0, 20).unwrap();
        store.append("foo", 0, 40).unwrap();

        assert!(store.contains_name("bar").unwrap());
        assert!(!store.contains_name("baz").unwrap());
        assert_eq!(store.matching_rows("foo").unwrap(), vec![0, 2]);
        assert_eq!(store.delta_sum_at(&[0, 2]).unwrap(), (50, 2));
    }

    #[test]
    fn reopen_resumes_id_sequence() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.append("foo", 1, 1).unwrap();
            store.append("foo", 2, 2).unwrap();
        }
        let store = open_store(dir.path());
        assert_eq!(store.row_count(), 2);
        assert_eq!(store.append("foo", 3, 3).unwrap(), 2);
    }

    #[test]
    fn recovery_truncates_to_shortest_column() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path());
            for i in 0..100 {
                store.append("f", i, i).unwrap();
            }
        }

        // Simulate a crash that lost the tail of one column.
        let delta = OpenOptions::new()
            .write(true)
            .open(dir.path().join(DELTA_FILE))
            .unwrap();
        delta.set_len(90 * 8).unwrap();
        drop(delta);

        let store = open_store(dir.path());
        assert_eq!(store.row_count(), 90);
        assert_eq!(store.fetch(89).unwrap().start_ns, 89);
        assert!(matches!(store.fetch(90), Err(Error::OutOfRange { .. })));

        // Every column was cut back to the common prefix.
        for file in [ID_FILE, START_FILE, DELTA_FILE, NAME_IDX_FILE] {
            let len = std::fs::metadata(dir.path().join(file)).unwrap().len();
            assert_eq!(len, 90 * 8, "{file}");
        }
    }

    #[test]
    fn recovery_drops_partial_name_record() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.append("first", 1, 1).unwrap();
            store.append("second", 2, 2).unwrap();
        }

        // Chop the last name record in half; the fixed columns still hold
        // two full rows.
        let name_len = std::fs::metadata(dir.path().join(NAME_FILE)).unwrap().len();
        let name = OpenOptions::new()
            .write(true)
            .open(dir.path().join(NAME_FILE))
            .unwrap();
        name.set_len(name_len - 3).unwrap();
        drop(name);

        let store = open_store(dir.path());
        assert_eq!(store.row_count(), 1);
        assert_eq!(store.fetch(0).unwrap().name, "first");
    }

    #[test]
    fn rejects_oversized_name() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let huge = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            store.append(&huge, 0, 0),
            Err(Error::InvalidName(_))
        ));
        assert_eq!(store.row_count(), 0);
    }
}
