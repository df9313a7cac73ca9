//! Primary-key / unique-index discovery (SPEC_FULL §4.2), grounded on the
//! `pg_index`/`pg_attribute`/`pg_constraint` joins used by production CDC
//! clients to resolve a table's replica-identity key columns.

use crate::error::ReplicationResult;
use std::collections::HashMap;
use tokio_postgres::Client;

const PRIMARY_KEY_QUERY: &str = "
    SELECT a.attname
    FROM pg_constraint c
    JOIN pg_class t ON t.oid = c.conrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord) ON true
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE c.contype = 'p' AND n.nspname = $1 AND t.relname = $2
    ORDER BY k.ord";

const WINNING_UNIQUE_INDEX_QUERY: &str = "
    SELECT i.indexrelid
    FROM pg_index i
    JOIN pg_class t ON t.oid = i.indrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    WHERE i.indisunique AND i.indpred IS NULL AND n.nspname = $1 AND t.relname = $2
    ORDER BY i.indisprimary DESC, i.indexrelid
    LIMIT 1";

const INDEX_COLUMNS_QUERY: &str = "
    SELECT a.attname
    FROM pg_index i
    JOIN unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) ON true
    JOIN pg_attribute a ON a.attrelid = i.indrelid::regclass::oid AND a.attnum = k.attnum
    WHERE i.indexrelid = $1
    ORDER BY k.ord";

/// Looks up the key columns for `(schema, table)`: `pg_constraint` primary
/// key first, then the best unique index (ranked
/// `indisprimary DESC, indexrelid, ordinal`), then empty if neither exists.
/// This implements the *fully intended* fallback behavior; the Ruby source
/// this crate generalizes has a short-circuit bug in that fallback path
/// which discards the unique-index result before filtering — intentionally
/// not reproduced here (SPEC_FULL §9 open questions).
pub async fn discover_primary_key(
    client: &Client,
    schema: &str,
    table: &str,
) -> ReplicationResult<Vec<String>> {
    let rows = client.query(PRIMARY_KEY_QUERY, &[&schema, &table]).await?;
    if !rows.is_empty() {
        return Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect());
    }

    let index_rows = client
        .query(WINNING_UNIQUE_INDEX_QUERY, &[&schema, &table])
        .await?;
    let Some(index_row) = index_rows.into_iter().next() else {
        return Ok(Vec::new());
    };
    let index_oid: u32 = index_row.get(0);

    let col_rows = client.query(INDEX_COLUMNS_QUERY, &[&index_oid]).await?;
    Ok(col_rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

/// Caches discovered key columns per `(schema, table)` for the lifetime of
/// the Replicator; invalidated when a `Relation` OID is re-emitted with a
/// different schema (SPEC_FULL §7, "schema mismatch").
#[derive(Debug, Default)]
pub struct PrimaryKeyCache {
    cache: HashMap<(String, String), Vec<String>>,
}

impl PrimaryKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, schema: &str, table: &str) -> Option<&Vec<String>> {
        self.cache.get(&(schema.to_string(), table.to_string()))
    }

    pub fn insert(&mut self, schema: &str, table: &str, columns: Vec<String>) {
        self.cache.insert((schema.to_string(), table.to_string()), columns);
    }

    pub fn invalidate(&mut self, schema: &str, table: &str) {
        self.cache.remove(&(schema.to_string(), table.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_roundtrip() {
        let mut cache = PrimaryKeyCache::new();
        assert!(cache.get("public", "records").is_none());
        cache.insert("public", "records", vec!["id".into()]);
        assert_eq!(cache.get("public", "records"), Some(&vec!["id".to_string()]));
        cache.invalidate("public", "records");
        assert!(cache.get("public", "records").is_none());
    }
}
