//! The database handle: lifecycle, the capture entry point, and the read API.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::warn;

use crate::aggregate;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::storage::model::{CaptureEvent, Row, validate_name};
use crate::storage::store::{ColumnStore, RowIter};

/// Directories with a live handle in this process. A second handle over the
/// same directory would break append ordering, so it is rejected here;
/// cross-process exclusion is the embedder's responsibility.
static OPEN_DIRS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Handle to one capture database.
///
/// Cheap to clone; all clones share the same columns, queue, and consumer.
/// Dropping the last clone drains the queue and syncs the files.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<ColumnStore>,
    pipeline: Pipeline,
    dir: PathBuf,
    /// Set by the first teardown so `close` followed by drop cannot
    /// unregister a directory a newer handle has since claimed.
    torn_down: AtomicBool,
}

impl Database {
    /// Opens or creates the database at `config.directory`, recovering any
    /// partial row left by an unclean shutdown.
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.directory)?;
        let dir = config.directory.canonicalize()?;
        {
            let mut open_dirs = OPEN_DIRS.lock();
            if open_dirs.contains(&dir) {
                return Err(Error::AlreadyOpen(dir));
            }
            open_dirs.push(dir.clone());
        }

        match Self::build(&config, &dir) {
            Ok(inner) => Ok(Self {
                inner: Arc::new(inner),
            }),
            Err(e) => {
                unregister(&dir);
                Err(e)
            }
        }
    }

    fn build(config: &Config, dir: &Path) -> Result<Inner> {
        let store = Arc::new(ColumnStore::open(dir, config.fsync_every)?);
        let pipeline = if config.sync_consume {
            Pipeline::sync(Arc::clone(&store))
        } else {
            Pipeline::with_consumer(Arc::clone(&store), config.queue_capacity)?
        };
        Ok(Inner {
            store,
            pipeline,
            dir: dir.to_path_buf(),
            torn_down: AtomicBool::new(false),
        })
    }

    /// Records one capture as `(name, start_ns, end_ns - start_ns)`.
    ///
    /// `arg_count` is accepted for adapter compatibility; only the arity is
    /// observable and argument payloads are never persisted.
    ///
    /// Sync mode blocks until the row is written and surfaces i/o errors.
    /// Async mode never blocks on i/o: a full queue drops the event and
    /// bumps [`overflow_count`](Self::overflow_count) instead.
    pub fn capture(&self, name: &str, arg_count: usize, start_ns: i64, end_ns: i64) -> Result<()> {
        let _ = arg_count;
        validate_name(name)?;
        self.inner.pipeline.dispatch(CaptureEvent {
            name: name.to_string(),
            start_ns,
            delta_ns: end_ns - start_ns,
        })
    }

    /// Reconstructs the row with the given id from the four columns.
    pub fn fetch(&self, id: u64) -> Result<Row> {
        self.inner.store.fetch(id)
    }

    /// All rows in id order.
    pub fn fetch_all(&self) -> Result<Vec<Row>> {
        self.rows()?.collect()
    }

    /// Alias for [`fetch_all`](Self::fetch_all), for dashboard readers.
    pub fn logs(&self) -> Result<Vec<Row>> {
        self.fetch_all()
    }

    /// Lazy iterator over rows. Restartable: each call starts a fresh scan
    /// over the rows visible at that moment.
    pub fn rows(&self) -> Result<RowIter> {
        self.inner.store.rows()
    }

    /// Whether any row carries this name. Sequential scan of the name
    /// column only; worst case touches every name once.
    pub fn contains_name(&self, name: &str) -> Result<bool> {
        self.inner.store.contains_name(name)
    }

    /// Mean duration in nanoseconds for the named function, `0.0` when the
    /// name never occurs.
    pub fn average(&self, name: &str) -> Result<f64> {
        aggregate::average(&self.inner.store, name)
    }

    pub fn row_count(&self) -> u64 {
        self.inner.store.row_count()
    }

    /// Events dropped because the async queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.inner.pipeline.stats().dropped.load(Ordering::Relaxed)
    }

    /// Appends the background consumer failed with an i/o error.
    pub fn io_error_count(&self) -> u64 {
        self.inner.pipeline.stats().io_errors.load(Ordering::Relaxed)
    }

    /// Text of the most recent consumer-side i/o error.
    pub fn last_io_error(&self) -> Option<String> {
        self.inner.pipeline.stats().last_error.lock().clone()
    }

    /// Forces all column files to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.store.sync()
    }

    /// Drains the queue, joins the consumer, syncs the files, and releases
    /// the directory so it can be reopened even while this handle is still
    /// alive. Captures arriving after this are dropped. Dropping the last
    /// handle does the same; a process exit that skips both may lose up to
    /// `queue_capacity` of the most recent async events.
    pub fn close(&self) {
        self.inner.teardown();
    }

    /// Directory holding the column files.
    pub fn directory(&self) -> &Path {
        &self.inner.dir
    }
}

impl Inner {
    /// Full teardown: drain and join the consumer, sync the files, release
    /// the directory registration. Runs once; later calls are no-ops and
    /// the pipeline refuses events after its shutdown.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pipeline.shutdown();
        if let Err(e) = self.store.sync() {
            warn!("final sync on close failed: {e}");
        }
        unregister(&self.dir);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn unregister(dir: &Path) {
    OPEN_DIRS.lock().retain(|open| open != dir);
}

static GLOBAL: OnceLock<Database> = OnceLock::new();
static GLOBAL_INIT: Mutex<()> = Mutex::new(());

/// Initialises the process-wide database once. Later calls return the
/// existing handle and ignore `config`; reopening the same directory across
/// process restarts recovers as usual.
pub fn init(config: Config) -> Result<&'static Database> {
    if let Some(db) = GLOBAL.get() {
        return Ok(db);
    }
    let _guard = GLOBAL_INIT.lock();
    if let Some(db) = GLOBAL.get() {
        return Ok(db);
    }
    let db = Database::open(config)?;
    Ok(GLOBAL.get_or_init(move || db))
}

/// The process-wide database, created with [`Config::default`] on first use.
pub fn global() -> Result<&'static Database> {
    init(Config::default())
}
