//! Aggregates the raw row-event stream into one terminal event per
//! `(table, primary_key)` per transaction (SPEC_FULL §4.5).

mod memory;
mod temp_table;

pub use memory::MemoryBackend;
pub use temp_table::TemporaryTableBackend;

use crate::error::WatcherResult;
use pgcdc_core::{CoreResult, Event, Watcher, Xid};
use std::collections::HashSet;
use tracing::warn;

/// A pluggable store for in-flight transaction state. `Memory` and
/// `TemporaryTable` are the two strategies named in SPEC_FULL §4.5; any
/// caller-supplied store (e.g. for tests) may also implement this.
pub trait AggregationBackend: Send {
    fn upsert(&mut self, event: Event);
    fn drain(&mut self) -> Vec<Event>;
}

/// Threshold above which `BeginTransaction.estimated_size` selects the
/// temporary-table backend instead of the in-memory map.
const TEMP_TABLE_THRESHOLD_BYTES: i64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStrategy {
    Memory,
    TemporaryTable,
}

/// Any value other than a size at or above the threshold — including zero
/// or negative, which `estimated_size` can produce for a malformed
/// `final_lsn <= lsn` — selects memory (SPEC_FULL §9 open question).
pub fn choose_strategy(estimated_size: i64) -> AggregationStrategy {
    if estimated_size >= TEMP_TABLE_THRESHOLD_BYTES {
        AggregationStrategy::TemporaryTable
    } else {
        AggregationStrategy::Memory
    }
}

/// Combines the prior terminal state for a key (if any) with an incoming
/// event, per the coalescing law in SPEC_FULL §4.5. `None` means the key's
/// state is erased (an insert-then-delete within the same transaction is
/// invisible to the aggregator).
pub fn coalesce(prior: Option<Event>, incoming: Event) -> Option<Event> {
    use Event::*;
    match prior {
        None => Some(incoming),
        Some(Insert { .. }) => match incoming {
            Delete { .. } => None,
            Update { xid, lsn, context, schema, table, primary_key, new, .. } => {
                Some(Insert { xid, lsn, context, schema, table, primary_key, new })
            }
            other => Some(other),
        },
        Some(Update { old, .. }) => match incoming {
            Update { xid, lsn, context, schema, table, primary_key, new, .. } => {
                Some(Update { xid, lsn, context, schema, table, primary_key, old, new })
            }
            Delete { xid, lsn, context, schema, table, primary_key, .. } => {
                Some(Delete { xid, lsn, context, schema, table, primary_key, old })
            }
            other => Some(other), // Insert after Update: anomalous, last write wins
        },
        Some(prior_delete @ Delete { .. }) => match incoming {
            Delete { .. } => Some(prior_delete), // idempotent
            other => Some(other),
        },
        Some(_) => Some(incoming), // Begin/Commit are never stored by a backend
    }
}

enum HandlerKind {
    Insert,
    Update,
    Save,
    Destroy,
}

struct HandlerSpec {
    table: String,
    kind: HandlerKind,
    changed: Option<HashSet<String>>,
    callback: Box<dyn FnMut(&Event) + Send>,
}

/// Accepted by the builder's table-selecting methods: either a literal name
/// or anything exposing one, mirroring the source's duck-typed `table_name`.
pub trait TableRef {
    fn table_name(&self) -> String;
}

impl TableRef for &str {
    fn table_name(&self) -> String {
        (*self).to_string()
    }
}

impl TableRef for String {
    fn table_name(&self) -> String {
        self.clone()
    }
}

/// Builds an immutable [`RecordWatcher`]. The source attaches handlers to a
/// class body at definition time; there is no open-class equivalent here,
/// so registration happens on this builder and `build()` freezes it
/// (SPEC_FULL §9).
#[derive(Default)]
pub struct RecordWatcherBuilder {
    handlers: Vec<HandlerSpec>,
    temp_table_connection_string: Option<String>,
}

impl RecordWatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a session-temporary table on this connection when a transaction
    /// crosses the size threshold, instead of silently staying in memory.
    pub fn with_temp_table_backend(mut self, connection_string: impl Into<String>) -> Self {
        self.temp_table_connection_string = Some(connection_string.into());
        self
    }

    pub fn on_insert(self, table: impl TableRef, callback: impl FnMut(&Event) + Send + 'static) -> Self {
        self.register(table, HandlerKind::Insert, None, callback)
    }

    pub fn on_update(self, table: impl TableRef, callback: impl FnMut(&Event) + Send + 'static) -> Self {
        self.register(table, HandlerKind::Update, None, callback)
    }

    pub fn on_update_changed(
        self,
        table: impl TableRef,
        changed: &[&str],
        callback: impl FnMut(&Event) + Send + 'static,
    ) -> Self {
        self.register(table, HandlerKind::Update, Some(changed_set(changed)), callback)
    }

    pub fn on_save(self, table: impl TableRef, callback: impl FnMut(&Event) + Send + 'static) -> Self {
        self.register(table, HandlerKind::Save, None, callback)
    }

    pub fn on_save_changed(
        self,
        table: impl TableRef,
        changed: &[&str],
        callback: impl FnMut(&Event) + Send + 'static,
    ) -> Self {
        self.register(table, HandlerKind::Save, Some(changed_set(changed)), callback)
    }

    pub fn on_destroy(self, table: impl TableRef, callback: impl FnMut(&Event) + Send + 'static) -> Self {
        self.register(table, HandlerKind::Destroy, None, callback)
    }

    fn register(
        mut self,
        table: impl TableRef,
        kind: HandlerKind,
        changed: Option<HashSet<String>>,
        callback: impl FnMut(&Event) + Send + 'static,
    ) -> Self {
        self.handlers.push(HandlerSpec { table: table.table_name(), kind, changed, callback: Box::new(callback) });
        self
    }

    pub fn build(self) -> RecordWatcher {
        let watched_tables = self.handlers.iter().map(|h| h.table.clone()).collect();
        RecordWatcher {
            handlers: self.handlers,
            watched_tables,
            temp_table_connection_string: self.temp_table_connection_string,
            backend: Box::new(MemoryBackend::default()),
            current_xid: None,
        }
    }
}

fn changed_set(cols: &[&str]) -> HashSet<String> {
    cols.iter().map(|c| c.to_string()).collect()
}

/// Dispatches one terminal event per `(table, primary_key)` per transaction
/// to the handlers registered against a [`RecordWatcherBuilder`].
pub struct RecordWatcher {
    handlers: Vec<HandlerSpec>,
    watched_tables: HashSet<String>,
    temp_table_connection_string: Option<String>,
    backend: Box<dyn AggregationBackend>,
    current_xid: Option<Xid>,
}

impl RecordWatcher {
    fn select_backend(&self, estimated_size: i64) -> WatcherResult<Box<dyn AggregationBackend>> {
        match choose_strategy(estimated_size) {
            AggregationStrategy::Memory => Ok(Box::new(MemoryBackend::default())),
            AggregationStrategy::TemporaryTable => match &self.temp_table_connection_string {
                Some(conn) => Ok(Box::new(TemporaryTableBackend::connect(conn)?)),
                None => {
                    warn!(
                        estimated_size,
                        "transaction exceeds temp-table threshold but no temp-table backend is configured, staying in memory"
                    );
                    Ok(Box::new(MemoryBackend::default()))
                }
            },
        }
    }

    fn dispatch(&mut self, event: &Event) {
        let Some(table) = event.full_table_name() else { return };
        for handler in &mut self.handlers {
            if handler.table != table {
                continue;
            }
            let matches_kind = matches!(
                (&handler.kind, event),
                (HandlerKind::Insert, Event::Insert { .. })
                    | (HandlerKind::Update, Event::Update { .. })
                    | (HandlerKind::Save, Event::Insert { .. })
                    | (HandlerKind::Save, Event::Update { .. })
                    | (HandlerKind::Destroy, Event::Delete { .. })
            );
            if !matches_kind {
                continue;
            }
            if let Some(changed) = &handler.changed {
                let diff = event.diff();
                if !changed.iter().any(|c| diff.contains_key(c)) {
                    continue;
                }
            }
            (handler.callback)(event);
        }
    }
}

impl Watcher for RecordWatcher {
    fn on_event(&mut self, event: Event) -> CoreResult<()> {
        match event {
            Event::BeginTransaction { xid, .. } => {
                self.current_xid = Some(xid);
                self.backend = self
                    .select_backend(event.estimated_size())
                    .map_err(|e| pgcdc_core::CoreError::Watcher(e.to_string()))?;
                Ok(())
            }
            Event::CommitTransaction { .. } => {
                let events = self.backend.drain();
                for ev in &events {
                    self.dispatch(ev);
                }
                self.current_xid = None;
                Ok(())
            }
            row_event @ (Event::Insert { .. } | Event::Update { .. } | Event::Delete { .. }) => {
                self.backend.upsert(row_event);
                Ok(())
            }
        }
    }

    fn should_watch_table(&self, full_name: &str) -> bool {
        self.watched_tables.contains(full_name)
    }
}
