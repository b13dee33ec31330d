//! Capture delivery: synchronous appends or a bounded queue drained by a
//! background consumer.
//!
//! Producers never block on a full queue. Overflow drops the newest event
//! and bumps a counter; the profiler must never stall the profiled code.
//! The consumer is the only writer in async mode, so id order equals
//! enqueue order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::Result;
use crate::storage::model::CaptureEvent;
use crate::storage::store::ColumnStore;

pub(crate) enum QueueMessage {
    Event(CaptureEvent),
    Shutdown,
}

/// Counters shared between producers, the consumer, and the read API.
#[derive(Default)]
pub(crate) struct PipelineStats {
    /// Events dropped because the queue was full.
    pub dropped: AtomicU64,
    /// Appends the consumer failed with an i/o error.
    pub io_errors: AtomicU64,
    /// Text of the most recent consumer-side error.
    pub last_error: Mutex<Option<String>>,
}

pub(crate) struct Pipeline {
    store: Arc<ColumnStore>,
    sender: Option<Sender<QueueMessage>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<PipelineStats>,
    closed: AtomicBool,
}

impl Pipeline {
    /// Synchronous pipeline: `dispatch` appends on the caller's thread.
    pub fn sync(store: Arc<ColumnStore>) -> Self {
        Self {
            store,
            sender: None,
            consumer: Mutex::new(None),
            stats: Arc::new(PipelineStats::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Asynchronous pipeline with a bounded queue and one consumer thread.
    pub fn with_consumer(store: Arc<ColumnStore>, queue_capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded(queue_capacity.max(1));
        let stats = Arc::new(PipelineStats::default());
        let handle = thread::Builder::new()
            .name("kronicler-consumer".into())
            .spawn({
                let store = Arc::clone(&store);
                let stats = Arc::clone(&stats);
                move || run_consumer(store, rx, stats)
            })?;
        Ok(Self {
            store,
            sender: Some(tx),
            consumer: Mutex::new(Some(handle)),
            stats,
            closed: AtomicBool::new(false),
        })
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Hands one event to the store. Sync mode surfaces append errors to the
    /// caller; async mode never blocks and never fails. After shutdown the
    /// event is dropped in either mode.
    pub fn dispatch(&self, event: CaptureEvent) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            debug!("capture after shutdown, dropping event");
            return Ok(());
        }
        match &self.sender {
            None => {
                self.store.append(&event.name, event.start_ns, event.delta_ns)?;
                Ok(())
            }
            Some(tx) => {
                match tx.try_send(QueueMessage::Event(event)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("capture queue full, dropping newest event");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("capture after shutdown, dropping event");
                    }
                }
                Ok(())
            }
        }
    }

    /// Signals the consumer, waits for the queue to drain, and joins the
    /// thread. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = &self.sender {
            let _ = tx.send(QueueMessage::Shutdown);
        }
        if let Some(handle) = self.consumer.lock().take() {
            if handle.join().is_err() {
                error!("capture consumer thread panicked");
            }
        }
    }
}

fn run_consumer(store: Arc<ColumnStore>, rx: Receiver<QueueMessage>, stats: Arc<PipelineStats>) {
    loop {
        match rx.recv() {
            Ok(QueueMessage::Event(event)) => consume(&store, &stats, event),
            Ok(QueueMessage::Shutdown) | Err(_) => break,
        }
    }
    // The channel is FIFO, so everything enqueued before the shutdown signal
    // is already applied; drain whatever raced in behind it.
    while let Ok(QueueMessage::Event(event)) = rx.try_recv() {
        consume(&store, &stats, event);
    }
}

fn consume(store: &ColumnStore, stats: &PipelineStats, event: CaptureEvent) {
    if let Err(e) = store.append(&event.name, event.start_ns, event.delta_ns) {
        stats.io_errors.fetch_add(1, Ordering::Relaxed);
        *stats.last_error.lock() = Some(e.to_string());
        error!("background append failed: {e}");
    }
}
