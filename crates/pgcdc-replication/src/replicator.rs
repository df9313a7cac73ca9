use crate::connect;
use crate::error::{ReplicationError, ReplicationResult};
use crate::lsn::format_lsn;
use crate::pgoutput::{self, ColumnValue, LogicalMessage, PgOutputMessage, TupleData};
use crate::pkey::{discover_primary_key, PrimaryKeyCache};
use crate::protocol::{encode_standby_status_update, parse_frame, ReplicationFrame};
use crate::relation::{Column, Relation, RelationCache};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use pgcdc_core::decode::decode_text;
use pgcdc_core::{Context, DecodedRow, Event, Lsn, PrimaryKey, Value, Watcher, Xid};
use tokio_postgres::Client;
use tracing::{debug, info, warn};

pub struct ReplicatorConfig {
    pub connection_string: String,
    pub slot_name: String,
    pub publications: Vec<String>,
    pub temporary: bool,
}

/// Per-xid mutable state; this is the only state the Replicator carries
/// across messages within a transaction (SPEC_FULL §9).
struct TransactionState {
    xid: Xid,
    context: Context,
}

pub struct Replicator {
    config: ReplicatorConfig,
    relations: RelationCache,
    pk_cache: PrimaryKeyCache,
    metadata_client: Option<Client>,
    last_confirmed_lsn: Lsn,
    current_tx: Option<TransactionState>,
}

impl Replicator {
    pub fn new(config: ReplicatorConfig) -> Self {
        Replicator {
            config,
            relations: RelationCache::new(),
            pk_cache: PrimaryKeyCache::new(),
            metadata_client: None,
            last_confirmed_lsn: 0,
            current_tx: None,
        }
    }

    /// Entry point used by the Runner. Swallows the normal end-of-stream
    /// sentinel (server closed the replication connection without error);
    /// every other failure propagates so the Runner's retry policy applies.
    pub async fn replicate_forever(&mut self, watcher: &mut dyn Watcher) -> ReplicationResult<()> {
        self.replicate(watcher).await
    }

    pub async fn replicate(&mut self, watcher: &mut dyn Watcher) -> ReplicationResult<()> {
        self.metadata_client = Some(connect::connect_metadata(&self.config.connection_string).await?);
        let replication_client = connect::connect_replication(&self.config.connection_string).await?;

        self.create_slot(&replication_client).await?;

        let publication_names = self.config.publications.join(",");
        let start_query = format!(
            "START_REPLICATION SLOT \"{}\" LOGICAL 0/0 (publication_names '{}', messages 'true', proto_version '1')",
            self.config.slot_name, publication_names
        );
        info!(slot = %self.config.slot_name, "starting replication");
        let duplex = replication_client
            .copy_both_simple::<Bytes>(&start_query)
            .await?;
        tokio::pin!(duplex);

        loop {
            let Some(frame) = duplex.next().await else {
                info!(slot = %self.config.slot_name, "replication stream closed by server");
                return Ok(());
            };
            let frame = frame?;
            match parse_frame(&frame)? {
                ReplicationFrame::XLogData(xlog) => {
                    let msg = pgoutput::decode(&xlog.payload)?;
                    self.dispatch(msg, xlog.wal_start, watcher, &mut duplex).await?;
                }
                ReplicationFrame::Keepalive(k) => {
                    if k.reply_requested {
                        let ack = self.last_confirmed_lsn.max(k.wal_end);
                        duplex
                            .send(encode_standby_status_update(ack, false))
                            .await?;
                    }
                }
            }
        }
    }

    async fn create_slot(&self, client: &Client) -> ReplicationResult<()> {
        let temp = if self.config.temporary { "TEMPORARY " } else { "" };
        let query = format!(
            "CREATE_REPLICATION_SLOT \"{}\" {}LOGICAL \"pgoutput\"",
            self.config.slot_name, temp
        );
        match client.simple_query(&query).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let is_duplicate = e
                    .as_db_error()
                    .map(|db| db.code().code() == "42710")
                    .unwrap_or(false);
                if is_duplicate {
                    debug!(slot = %self.config.slot_name, "replication slot already exists");
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn dispatch<S>(
        &mut self,
        msg: PgOutputMessage,
        lsn: Lsn,
        watcher: &mut dyn Watcher,
        duplex: &mut S,
    ) -> ReplicationResult<()>
    where
        S: SinkExt<Bytes, Error = tokio_postgres::Error> + Unpin,
    {
        match msg {
            PgOutputMessage::Relation(rel_msg) => {
                let oid = rel_msg.relation_id;
                let mut relation = Relation::from(&rel_msg);
                let existing_cols = self.relations.get(oid).map(|r| r.columns.clone());
                if existing_cols.as_ref() != Some(&relation.columns) {
                    self.pk_cache.invalidate(&relation.schema, &relation.table);
                }
                let key_columns = self
                    .resolve_primary_key_columns(&relation.schema, &relation.table)
                    .await?;
                relation.primary_key_columns = key_columns;
                self.relations.insert(relation);
                Ok(())
            }
            PgOutputMessage::Begin(begin) => {
                self.current_tx = Some(TransactionState { xid: begin.xid, context: Context::new() });
                watcher
                    .on_event(Event::BeginTransaction {
                        xid: begin.xid,
                        lsn,
                        final_lsn: begin.final_lsn,
                        timestamp: begin.timestamp,
                    })
                    .map_err(|e| ReplicationError::Watcher(e.to_string()))
            }
            PgOutputMessage::Message(logical) if logical.prefix == "wal_ping" => {
                let ack = self.last_confirmed_lsn.max(logical.lsn);
                duplex
                    .send(encode_standby_status_update(ack, false))
                    .await
                    .map_err(ReplicationError::from)?;
                Ok(())
            }
            PgOutputMessage::Message(logical) => {
                self.handle_context_message(logical, watcher);
                Ok(())
            }
            PgOutputMessage::Insert(insert) => {
                let Some(relation) = self.relations.get(insert.relation_id).cloned() else {
                    warn!(oid = insert.relation_id, "insert for unknown relation, dropping");
                    return Ok(());
                };
                let full_name = relation.full_name();
                if !watcher.should_watch_table(&full_name) {
                    return Ok(());
                }
                let new = decode_row(&relation.columns, &insert.tuple, None);
                let Some(primary_key) = PrimaryKey::resolve(&new, &relation.primary_key_columns) else {
                    return Ok(());
                };
                let (xid, context) = self.tx_fields();
                watcher
                    .on_event(Event::Insert {
                        xid,
                        lsn,
                        context,
                        schema: relation.schema.clone(),
                        table: relation.table.clone(),
                        primary_key,
                        new,
                    })
                    .map_err(|e| ReplicationError::Watcher(e.to_string()))
            }
            PgOutputMessage::Update(update) => {
                let Some(relation) = self.relations.get(update.relation_id).cloned() else {
                    warn!(oid = update.relation_id, "update for unknown relation, dropping");
                    return Ok(());
                };
                let full_name = relation.full_name();
                if !watcher.should_watch_table(&full_name) {
                    return Ok(());
                }
                let new = decode_row(&relation.columns, &update.new_tuple, update.old_tuple.as_ref());
                let old = match &update.old_tuple {
                    Some(old_tuple) => decode_row(&relation.columns, old_tuple, Some(&update.new_tuple)),
                    None => DecodedRow::new(),
                };
                let Some(primary_key) = PrimaryKey::resolve(&new, &relation.primary_key_columns) else {
                    return Ok(());
                };
                let (xid, context) = self.tx_fields();
                watcher
                    .on_event(Event::Update {
                        xid,
                        lsn,
                        context,
                        schema: relation.schema.clone(),
                        table: relation.table.clone(),
                        primary_key,
                        old,
                        new,
                    })
                    .map_err(|e| ReplicationError::Watcher(e.to_string()))
            }
            PgOutputMessage::Delete(delete) => {
                let Some(relation) = self.relations.get(delete.relation_id).cloned() else {
                    warn!(oid = delete.relation_id, "delete for unknown relation, dropping");
                    return Ok(());
                };
                let full_name = relation.full_name();
                if !watcher.should_watch_table(&full_name) {
                    return Ok(());
                }
                let Some(old_tuple) = &delete.old_tuple else {
                    return Ok(());
                };
                let old = decode_row(&relation.columns, old_tuple, None);
                let Some(primary_key) = PrimaryKey::resolve(&old, &relation.primary_key_columns) else {
                    return Ok(());
                };
                let (xid, context) = self.tx_fields();
                watcher
                    .on_event(Event::Delete {
                        xid,
                        lsn,
                        context,
                        schema: relation.schema.clone(),
                        table: relation.table.clone(),
                        primary_key,
                        old,
                    })
                    .map_err(|e| ReplicationError::Watcher(e.to_string()))
            }
            PgOutputMessage::Commit(commit) => {
                let (xid, context) = self.tx_fields();
                watcher
                    .on_event(Event::CommitTransaction {
                        xid,
                        lsn,
                        context,
                        timestamp: commit.timestamp,
                    })
                    .map_err(|e| ReplicationError::Watcher(e.to_string()))?;
                self.last_confirmed_lsn = commit.commit_lsn;
                self.current_tx = None;
                duplex
                    .send(encode_standby_status_update(commit.commit_lsn, false))
                    .await
                    .map_err(ReplicationError::from)?;
                debug!(lsn = %format_lsn(commit.commit_lsn), "acknowledged commit");
                Ok(())
            }
            // Type, Truncate, Origin and any other message carry no row-event
            // obligation for this crate's scope (SPEC_FULL §4.3 "anything else: drop").
            PgOutputMessage::Type(_) | PgOutputMessage::Truncate(_) | PgOutputMessage::Origin(_) => {
                Ok(())
            }
        }
    }

    fn handle_context_message(&mut self, logical: LogicalMessage, watcher: &dyn Watcher) {
        if !watcher.valid_context_prefix(&logical.prefix) {
            return;
        }
        let Some(tx) = &mut self.current_tx else { return };
        match serde_json::from_slice::<serde_json::Value>(&logical.content) {
            Ok(serde_json::Value::Object(map)) => {
                tx.context = map.into_iter().collect();
            }
            Ok(_) | Err(_) => {
                // malformed or non-object context: keep prior context (SPEC_FULL §7).
            }
        }
    }

    fn tx_fields(&self) -> (Xid, Context) {
        match &self.current_tx {
            Some(tx) => (tx.xid, tx.context.clone()),
            None => (0, Context::new()),
        }
    }

    /// Looks up the PK cache, then the catalog; retries once against a
    /// freshly reopened metadata connection on `ConnectionBad`.
    async fn resolve_primary_key_columns(
        &mut self,
        schema: &str,
        table: &str,
    ) -> ReplicationResult<Vec<String>> {
        if let Some(cached) = self.pk_cache.get(schema, table) {
            return Ok(cached.clone());
        }

        let result = {
            let client = self.metadata_client.as_ref().expect("metadata connection not open");
            discover_primary_key(client, schema, table).await
        };

        let columns = match result {
            Ok(columns) => columns,
            Err(e) if e.is_connection_bad() => {
                warn!("metadata connection bad, reopening and retrying primary key lookup");
                self.metadata_client =
                    Some(connect::connect_metadata(&self.config.connection_string).await?);
                let client = self.metadata_client.as_ref().unwrap();
                discover_primary_key(client, schema, table).await?
            }
            Err(e) => return Err(e),
        };

        self.pk_cache.insert(schema, table, columns.clone());
        Ok(columns)
    }
}

/// Decodes a positional tuple into a `DecodedRow`, resolving
/// `toast-unchanged` markers against `counterpart` (the other half of an
/// Update's old/new pair) when available; otherwise the column is left
/// `Null` and is the aggregation engine's responsibility to carry forward
/// (SPEC_FULL §3).
fn decode_row(columns: &[Column], tuple: &TupleData, counterpart: Option<&TupleData>) -> DecodedRow {
    let mut row = DecodedRow::new();
    for (i, col) in columns.iter().enumerate() {
        let value = match tuple.columns.get(i) {
            Some(ColumnValue::Null) => Value::Null,
            Some(ColumnValue::Text(text)) => decode_text(col.type_oid, text),
            Some(ColumnValue::Unchanged) | None => match counterpart.and_then(|c| c.columns.get(i)) {
                Some(ColumnValue::Text(text)) => decode_text(col.type_oid, text),
                _ => Value::Null,
            },
        };
        row.insert(col.name.clone(), value);
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::Column;

    fn columns() -> Vec<Column> {
        vec![
            Column { name: "id".into(), type_oid: pgcdc_core::decode::INT4 },
            Column { name: "large_text".into(), type_oid: pgcdc_core::decode::TEXT },
        ]
    }

    #[test]
    fn toast_unchanged_resolves_from_counterpart() {
        let new_tuple = TupleData {
            columns: vec![ColumnValue::Text("1".into()), ColumnValue::Unchanged],
        };
        let old_tuple = TupleData {
            columns: vec![ColumnValue::Text("1".into()), ColumnValue::Text("big-value".into())],
        };
        let new_row = decode_row(&columns(), &new_tuple, Some(&old_tuple));
        assert_eq!(new_row.get("large_text"), Some(&Value::String("big-value".into())));
    }

    #[test]
    fn toast_unchanged_without_counterpart_is_null() {
        let tuple = TupleData { columns: vec![ColumnValue::Text("1".into()), ColumnValue::Unchanged] };
        let row = decode_row(&columns(), &tuple, None);
        assert_eq!(row.get("large_text"), Some(&Value::Null));
    }
}
