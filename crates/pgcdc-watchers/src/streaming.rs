//! A watcher that hands events to a worker as they arrive, rather than
//! buffering a whole transaction (SPEC_FULL §4.6). Useful for callers who
//! want to start acting on a transaction before it commits.

use crate::error::WatcherError;
use pgcdc_core::{CoreError, CoreResult, Event, Watcher};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

pub const DEFAULT_QUEUE_SIZE: usize = 5000;

/// Consumes one transaction's worth of events as an iterator. Iteration
/// ends when the commit event has been yielded (EOF).
pub struct EventStream {
    rx: Receiver<Event>,
}

impl Iterator for EventStream {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.rx.recv().ok()
    }
}

/// Implemented by callers of [`StreamingWatcher`]. `on_transaction_events`
/// runs on a dedicated worker thread for the lifetime of one transaction.
pub trait TransactionHandler: Send + 'static {
    fn queue_size(&self, _begin: &Event) -> usize {
        DEFAULT_QUEUE_SIZE
    }

    fn on_transaction_events(&mut self, events: EventStream);
}

/// Wraps a [`TransactionHandler`], feeding it events through a bounded
/// channel. `on_event` blocks when the queue is full — this mirrors the
/// Replicator's own blocking-reader model (SPEC_FULL §5) rather than
/// dropping or buffering unboundedly.
pub struct StreamingWatcher<H: TransactionHandler> {
    handler: Arc<Mutex<H>>,
    sender: Option<SyncSender<Event>>,
    worker: Option<JoinHandle<()>>,
}

impl<H: TransactionHandler> StreamingWatcher<H> {
    pub fn new(handler: H) -> Self {
        StreamingWatcher { handler: Arc::new(Mutex::new(handler)), sender: None, worker: None }
    }
}

impl<H: TransactionHandler> Watcher for StreamingWatcher<H> {
    fn on_event(&mut self, event: Event) -> CoreResult<()> {
        match event {
            begin @ Event::BeginTransaction { .. } => {
                let queue_size = self.handler.lock().unwrap().queue_size(&begin).max(1);
                let (tx, rx) = mpsc::sync_channel(queue_size);
                let handler = self.handler.clone();
                let worker = thread::spawn(move || {
                    handler.lock().unwrap().on_transaction_events(EventStream { rx });
                });
                self.sender = Some(tx);
                self.worker = Some(worker);
                Ok(())
            }
            commit @ Event::CommitTransaction { .. } => {
                if let Some(tx) = self.sender.take() {
                    let _ = tx.send(commit);
                }
                if let Some(worker) = self.worker.take() {
                    return worker.join().map_err(|panic| {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        CoreError::Watcher(WatcherError::WorkerPanic(message).to_string())
                    });
                }
                Ok(())
            }
            other => {
                if let Some(tx) = &self.sender {
                    tx.send(other)
                        .map_err(|_| CoreError::Watcher(WatcherError::WorkerFailed("worker gone".into()).to_string()))?;
                }
                Ok(())
            }
        }
    }
}
