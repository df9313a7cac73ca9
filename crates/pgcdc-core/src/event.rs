use crate::value::Value;
use std::collections::HashMap;

/// 64-bit monotonic log-sequence number assigned by PostgreSQL.
pub type Lsn = u64;

/// Server-side transaction identifier.
pub type Xid = u64;

/// Mapping from column name to decoded native value.
pub type DecodedRow = HashMap<String, Value>;

/// Mapping `string -> any`, attached to row events and carried within a
/// transaction via the logical-message context protocol (see SPEC_FULL §6).
pub type Context = HashMap<String, serde_json::Value>;

/// A table's primary key value: a scalar for single-column keys, an
/// ordered tuple for composite keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    Int(i64),
    String(String),
    Composite(Vec<PrimaryKeyScalar>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimaryKeyScalar {
    Int(i64),
    String(String),
}

impl PrimaryKey {
    /// Builds a `PrimaryKey` from the decoded values of the key columns, in
    /// key order. Returns `None` if any key column is missing, null, or not
    /// an integer/string scalar — such events are dropped (SPEC_FULL §3).
    pub fn resolve(row: &DecodedRow, key_columns: &[String]) -> Option<PrimaryKey> {
        if key_columns.is_empty() {
            return None;
        }
        let mut scalars = Vec::with_capacity(key_columns.len());
        for col in key_columns {
            let scalar = match row.get(col)? {
                Value::Int(i) => PrimaryKeyScalar::Int(*i),
                Value::String(s) => PrimaryKeyScalar::String(s.clone()),
                Value::Uuid(u) => PrimaryKeyScalar::String(u.to_string()),
                Value::Numeric(s) => PrimaryKeyScalar::String(s.clone()),
                _ => return None,
            };
            scalars.push(scalar);
        }
        Some(if scalars.len() == 1 {
            match scalars.into_iter().next().unwrap() {
                PrimaryKeyScalar::Int(i) => PrimaryKey::Int(i),
                PrimaryKeyScalar::String(s) => PrimaryKey::String(s),
            }
        } else {
            PrimaryKey::Composite(scalars)
        })
    }
}

/// A row-or-transaction level event, produced by the Replicator in server
/// order and bracketed per transaction by `BeginTransaction`/`CommitTransaction`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    BeginTransaction {
        xid: Xid,
        lsn: Lsn,
        final_lsn: Lsn,
        timestamp: i64,
    },
    Insert {
        xid: Xid,
        lsn: Lsn,
        context: Context,
        schema: String,
        table: String,
        primary_key: PrimaryKey,
        new: DecodedRow,
    },
    Update {
        xid: Xid,
        lsn: Lsn,
        context: Context,
        schema: String,
        table: String,
        primary_key: PrimaryKey,
        old: DecodedRow,
        new: DecodedRow,
    },
    Delete {
        xid: Xid,
        lsn: Lsn,
        context: Context,
        schema: String,
        table: String,
        primary_key: PrimaryKey,
        old: DecodedRow,
    },
    CommitTransaction {
        xid: Xid,
        lsn: Lsn,
        context: Context,
        timestamp: i64,
    },
}

impl Event {
    pub fn xid(&self) -> Xid {
        match self {
            Event::BeginTransaction { xid, .. }
            | Event::Insert { xid, .. }
            | Event::Update { xid, .. }
            | Event::Delete { xid, .. }
            | Event::CommitTransaction { xid, .. } => *xid,
        }
    }

    pub fn lsn(&self) -> Lsn {
        match self {
            Event::BeginTransaction { lsn, .. }
            | Event::Insert { lsn, .. }
            | Event::Update { lsn, .. }
            | Event::Delete { lsn, .. }
            | Event::CommitTransaction { lsn, .. } => *lsn,
        }
    }

    pub fn estimated_size(&self) -> i64 {
        match self {
            Event::BeginTransaction { lsn, final_lsn, .. } => *final_lsn as i64 - *lsn as i64,
            _ => 0,
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Event::Insert { table, .. } | Event::Update { table, .. } | Event::Delete { table, .. } => {
                Some(table)
            }
            _ => None,
        }
    }

    pub fn schema(&self) -> Option<&str> {
        match self {
            Event::Insert { schema, .. } | Event::Update { schema, .. } | Event::Delete { schema, .. } => {
                Some(schema)
            }
            _ => None,
        }
    }

    /// `"schema.table"`, or just `"table"` when `schema == "public"`.
    pub fn full_table_name(&self) -> Option<String> {
        let (schema, table) = (self.schema()?, self.table()?);
        Some(full_table_name(schema, table))
    }

    pub fn primary_key(&self) -> Option<&PrimaryKey> {
        match self {
            Event::Insert { primary_key, .. }
            | Event::Update { primary_key, .. }
            | Event::Delete { primary_key, .. } => Some(primary_key),
            _ => None,
        }
    }

    /// `new[k]` for Insert/Update, `None` otherwise.
    pub fn attribute(&self, k: &str) -> Option<&Value> {
        match self {
            Event::Insert { new, .. } | Event::Update { new, .. } => new.get(k),
            _ => None,
        }
    }

    /// `old[k]` for Update/Delete, `None` otherwise.
    pub fn attribute_was(&self, k: &str) -> Option<&Value> {
        match self {
            Event::Update { old, .. } | Event::Delete { old, .. } => old.get(k),
            _ => None,
        }
    }

    pub fn changed_attribute(&self, k: &str) -> bool {
        self.diff().contains_key(k)
    }

    /// Computed per SPEC_FULL §4.5: `{k -> (old, new)}` for Insert (old is
    /// always null), Update (only keys that actually differ), and Delete
    /// (new is always null).
    pub fn diff(&self) -> HashMap<String, (Option<Value>, Option<Value>)> {
        match self {
            Event::Insert { new, .. } => new
                .iter()
                .map(|(k, v)| (k.clone(), (None, Some(v.clone()))))
                .collect(),
            Event::Update { old, new, .. } => new
                .iter()
                .filter(|(k, v)| old.get(*k) != Some(*v))
                .map(|(k, v)| (k.clone(), (old.get(k).cloned(), Some(v.clone()))))
                .collect(),
            Event::Delete { old, .. } => old
                .iter()
                .map(|(k, v)| (k.clone(), (Some(v.clone()), None)))
                .collect(),
            _ => HashMap::new(),
        }
    }

    pub fn context(&self) -> Option<&Context> {
        match self {
            Event::Insert { context, .. }
            | Event::Update { context, .. }
            | Event::Delete { context, .. }
            | Event::CommitTransaction { context, .. } => Some(context),
            Event::BeginTransaction { .. } => None,
        }
    }
}

pub fn full_table_name(schema: &str, table: &str) -> String {
    if schema == "public" {
        table.to_string()
    } else {
        format!("{schema}.{table}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> DecodedRow {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn primary_key_single_int() {
        let r = row(&[("id", Value::Int(42))]);
        assert_eq!(PrimaryKey::resolve(&r, &["id".into()]), Some(PrimaryKey::Int(42)));
    }

    #[test]
    fn primary_key_composite() {
        let r = row(&[("order_id", Value::Int(2)), ("product_id", Value::Int(200))]);
        let pk = PrimaryKey::resolve(&r, &["order_id".into(), "product_id".into()]);
        assert_eq!(
            pk,
            Some(PrimaryKey::Composite(vec![
                PrimaryKeyScalar::Int(2),
                PrimaryKeyScalar::Int(200)
            ]))
        );
    }

    #[test]
    fn primary_key_unresolvable_when_column_missing_or_wrong_type() {
        let r = row(&[("id", Value::Bool(true))]);
        assert_eq!(PrimaryKey::resolve(&r, &["id".into()]), None);
        assert_eq!(PrimaryKey::resolve(&r, &["missing".into()]), None);
    }

    #[test]
    fn full_table_name_drops_public_schema() {
        assert_eq!(full_table_name("public", "records"), "records");
        assert_eq!(full_table_name("alternate", "records"), "alternate.records");
    }

    #[test]
    fn diff_for_update_only_includes_changed_keys() {
        let old = row(&[("name", Value::String("a".into())), ("age", Value::Int(1))]);
        let new = row(&[("name", Value::String("b".into())), ("age", Value::Int(1))]);
        let event = Event::Update {
            xid: 1,
            lsn: 1,
            context: Context::new(),
            schema: "public".into(),
            table: "t".into(),
            primary_key: PrimaryKey::Int(1),
            old,
            new,
        };
        let diff = event.diff();
        assert_eq!(diff.len(), 1);
        assert!(diff.contains_key("name"));
        assert!(event.changed_attribute("name"));
        assert!(!event.changed_attribute("age"));
    }
}
