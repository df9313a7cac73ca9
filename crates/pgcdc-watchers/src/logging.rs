use pgcdc_core::{CoreResult, Event, Watcher};
use tracing::{debug, info};

/// Wraps another watcher, logging each event at `debug` and each transaction
/// boundary at `info`. The Runner applies this to every configured slot's
/// watcher before calling `replicate_forever` (SPEC_FULL §4.7).
pub struct LoggingWatcher {
    slot_name: String,
    inner: Box<dyn Watcher>,
}

impl LoggingWatcher {
    pub fn new(slot_name: impl Into<String>, inner: Box<dyn Watcher>) -> Self {
        LoggingWatcher { slot_name: slot_name.into(), inner }
    }
}

impl Watcher for LoggingWatcher {
    fn on_event(&mut self, event: Event) -> CoreResult<()> {
        match &event {
            Event::BeginTransaction { xid, lsn, .. } => {
                info!(slot = %self.slot_name, xid, lsn, "begin transaction");
            }
            Event::CommitTransaction { xid, lsn, .. } => {
                info!(slot = %self.slot_name, xid, lsn, "commit transaction");
            }
            _ => {
                debug!(
                    slot = %self.slot_name,
                    table = event.full_table_name().as_deref().unwrap_or("?"),
                    xid = event.xid(),
                    lsn = event.lsn(),
                    "row event"
                );
            }
        }
        self.inner.on_event(event)
    }

    fn should_watch_table(&self, full_name: &str) -> bool {
        self.inner.should_watch_table(full_name)
    }

    fn valid_context_prefix(&self, prefix: &str) -> bool {
        self.inner.valid_context_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgcdc_core::{Context, PrimaryKey};
    use std::sync::{Arc, Mutex};

    struct CountingWatcher {
        count: Arc<Mutex<usize>>,
    }

    impl Watcher for CountingWatcher {
        fn on_event(&mut self, _event: Event) -> CoreResult<()> {
            *self.count.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn forwards_events_to_inner_watcher() {
        let count = Arc::new(Mutex::new(0));
        let inner = CountingWatcher { count: count.clone() };
        let mut watcher = LoggingWatcher::new("test_slot", Box::new(inner));
        watcher
            .on_event(Event::BeginTransaction { xid: 1, lsn: 10, final_lsn: 20, timestamp: 0 })
            .unwrap();
        watcher
            .on_event(Event::Insert {
                xid: 1,
                lsn: 11,
                context: Context::new(),
                schema: "public".into(),
                table: "records".into(),
                primary_key: PrimaryKey::Int(1),
                new: Default::default(),
            })
            .unwrap();
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
