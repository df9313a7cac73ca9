use super::{coalesce, AggregationBackend};
use pgcdc_core::{Event, PrimaryKey};
use std::collections::HashMap;

type Key = (String, String, PrimaryKey);

/// Default aggregation strategy: an in-process map keyed by
/// `(schema, table, primary_key)`. Insertion order is not preserved across
/// drains (SPEC_FULL §4.5: "insertion-order irrelevant").
#[derive(Default)]
pub struct MemoryBackend {
    state: HashMap<Key, Event>,
}

impl AggregationBackend for MemoryBackend {
    fn upsert(&mut self, event: Event) {
        let (Some(schema), Some(table), Some(pk)) =
            (event.schema().map(str::to_string), event.table().map(str::to_string), event.primary_key().cloned())
        else {
            return;
        };
        let key = (schema, table, pk);
        let prior = self.state.remove(&key);
        if let Some(next) = coalesce(prior, event) {
            self.state.insert(key, next);
        }
    }

    fn drain(&mut self) -> Vec<Event> {
        self.state.drain().map(|(_, event)| event).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgcdc_core::{Context, DecodedRow, Value};

    fn insert(pk: i64) -> Event {
        Event::Insert {
            xid: 1,
            lsn: 1,
            context: Context::new(),
            schema: "public".into(),
            table: "records".into(),
            primary_key: PrimaryKey::Int(pk),
            new: DecodedRow::new(),
        }
    }

    fn delete(pk: i64) -> Event {
        Event::Delete {
            xid: 1,
            lsn: 2,
            context: Context::new(),
            schema: "public".into(),
            table: "records".into(),
            primary_key: PrimaryKey::Int(pk),
            old: DecodedRow::new(),
        }
    }

    #[test]
    fn insert_then_delete_in_one_transaction_drains_to_nothing() {
        let mut backend = MemoryBackend::default();
        backend.upsert(insert(1));
        backend.upsert(delete(1));
        assert!(backend.drain().is_empty());
    }

    #[test]
    fn independent_keys_both_drain() {
        let mut backend = MemoryBackend::default();
        backend.upsert(insert(1));
        backend.upsert(insert(2));
        let mut drained = backend.drain();
        drained.sort_by_key(|e| match e.primary_key() {
            Some(PrimaryKey::Int(i)) => *i,
            _ => 0,
        });
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn value_without_resolvable_primary_key_is_dropped() {
        let mut backend = MemoryBackend::default();
        let event = Event::BeginTransaction { xid: 1, lsn: 1, final_lsn: 1, timestamp: 0 };
        backend.upsert(event);
        assert!(backend.drain().is_empty());
    }
}
