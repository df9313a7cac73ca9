//! The spillable aggregation backend: a session-temporary table holding one
//! row per `(schema, table, primary_key)`, upserted in place and drained in
//! a batch at commit (SPEC_FULL §4.5). Used once a transaction's estimated
//! size crosses the in-memory threshold.

use super::{coalesce, AggregationBackend};
use crate::error::{WatcherError, WatcherResult};
use pgcdc_core::{Context, DecodedRow, Event, PrimaryKey, PrimaryKeyScalar, Value};
use pgcdc_replication::connect;
use serde_json::json;
use std::sync::mpsc;
use std::thread;
use tokio_postgres::Client;

enum Command {
    Upsert(Event),
    Drain(mpsc::Sender<Vec<Event>>),
}

pub struct TemporaryTableBackend {
    tx: Option<mpsc::Sender<Command>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TemporaryTableBackend {
    pub fn connect(connection_string: &str) -> WatcherResult<Self> {
        let connection_string = connection_string.to_string();
        let table_name = format!("temp_record_watcher_{:08x}", rand::random::<u32>());
        let (tx, rx) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::channel::<WatcherResult<()>>();

        let worker = thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = ready_tx.send(Err(WatcherError::Postgres(e.to_string())));
                    return;
                }
            };
            rt.block_on(run_session(connection_string, table_name, ready_tx, rx));
        });

        ready_rx
            .recv()
            .map_err(|_| WatcherError::Postgres("temp-table worker exited before signaling readiness".into()))??;

        Ok(TemporaryTableBackend { tx: Some(tx), worker: Some(worker) })
    }

    fn sender(&self) -> &mpsc::Sender<Command> {
        self.tx.as_ref().expect("TemporaryTableBackend used after drop")
    }
}

async fn run_session(
    connection_string: String,
    table_name: String,
    ready_tx: mpsc::Sender<WatcherResult<()>>,
    rx: mpsc::Receiver<Command>,
) {
    let client = match connect::connect_metadata(&connection_string).await {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(WatcherError::Postgres(e.to_string())));
            return;
        }
    };
    if let Err(e) = create_temp_table(&client, &table_name).await {
        let _ = ready_tx.send(Err(e));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Upsert(event) => {
                if let Err(e) = upsert_event(&client, &table_name, event).await {
                    tracing::error!("temp_record_watcher upsert failed: {e}");
                }
            }
            Command::Drain(reply) => {
                let events = drain_events(&client, &table_name).await.unwrap_or_else(|e| {
                    tracing::error!("temp_record_watcher drain failed: {e}");
                    Vec::new()
                });
                let _ = reply.send(events);
            }
        }
    }
}

impl AggregationBackend for TemporaryTableBackend {
    fn upsert(&mut self, event: Event) {
        if self.sender().send(Command::Upsert(event)).is_err() {
            tracing::error!("temp-table aggregation worker is gone, dropping event");
        }
    }

    fn drain(&mut self) -> Vec<Event> {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.sender().send(Command::Drain(reply_tx)).is_err() {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }
}

impl Drop for TemporaryTableBackend {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

async fn create_temp_table(client: &Client, table_name: &str) -> WatcherResult<()> {
    let sql = format!(
        "CREATE TEMP TABLE {table_name} (
            xid BIGINT NOT NULL,
            lsn BIGINT NOT NULL,
            action TEXT NOT NULL,
            schema_name TEXT NOT NULL,
            table_name TEXT NOT NULL,
            primary_key JSONB NOT NULL,
            old JSONB,
            new JSONB,
            context JSONB NOT NULL,
            PRIMARY KEY (schema_name, table_name, primary_key)
        ) ON COMMIT DROP"
    );
    client.batch_execute(&sql).await?;
    Ok(())
}

async fn upsert_event(client: &Client, table_name: &str, event: Event) -> WatcherResult<()> {
    let Some(schema) = event.schema().map(str::to_string) else { return Ok(()) };
    let Some(table) = event.table().map(str::to_string) else { return Ok(()) };
    let Some(pk) = event.primary_key().cloned() else { return Ok(()) };
    let pk_json = primary_key_to_json(&pk);

    let select_sql = format!(
        "SELECT xid, lsn, action, schema_name, table_name, primary_key, old, new, context
         FROM {table_name} WHERE schema_name = $1 AND table_name = $2 AND primary_key = $3"
    );
    let existing = client.query_opt(&select_sql, &[&schema, &table, &pk_json]).await?;
    let prior = existing.as_ref().and_then(row_to_event);

    match coalesce(prior, event) {
        None => {
            let delete_sql = format!(
                "DELETE FROM {table_name} WHERE schema_name = $1 AND table_name = $2 AND primary_key = $3"
            );
            client.execute(&delete_sql, &[&schema, &table, &pk_json]).await?;
        }
        Some(next) => {
            let (action, old_json, new_json) = match &next {
                Event::Insert { new, .. } => ("insert", None, Some(row_to_json(new))),
                Event::Update { old, new, .. } => ("update", Some(row_to_json(old)), Some(row_to_json(new))),
                Event::Delete { old, .. } => ("delete", Some(row_to_json(old)), None),
                _ => return Ok(()),
            };
            let context_json = context_to_json(next.context().cloned().unwrap_or_default());
            let upsert_sql = format!(
                "INSERT INTO {table_name} (xid, lsn, action, schema_name, table_name, primary_key, old, new, context)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
                 ON CONFLICT (schema_name, table_name, primary_key)
                 DO UPDATE SET xid = EXCLUDED.xid, lsn = EXCLUDED.lsn, action = EXCLUDED.action,
                               old = EXCLUDED.old, new = EXCLUDED.new, context = EXCLUDED.context"
            );
            client
                .execute(
                    &upsert_sql,
                    &[
                        &(next.xid() as i64),
                        &(next.lsn() as i64),
                        &action,
                        &schema,
                        &table,
                        &pk_json,
                        &old_json,
                        &new_json,
                        &context_json,
                    ],
                )
                .await?;
        }
    }
    Ok(())
}

async fn drain_events(client: &Client, table_name: &str) -> WatcherResult<Vec<Event>> {
    let select_sql = format!(
        "SELECT xid, lsn, action, schema_name, table_name, primary_key, old, new, context FROM {table_name}"
    );
    let rows = client.query(&select_sql, &[]).await?;
    let events = rows.iter().filter_map(row_to_event).collect();
    client.execute(&format!("DELETE FROM {table_name}"), &[]).await?;
    Ok(events)
}

fn row_to_json(row: &DecodedRow) -> serde_json::Value {
    serde_json::Value::Object(row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

fn row_from_json(v: &serde_json::Value) -> DecodedRow {
    match v {
        serde_json::Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
        _ => DecodedRow::new(),
    }
}

fn context_to_json(context: Context) -> serde_json::Value {
    serde_json::Value::Object(context.into_iter().collect())
}

fn context_from_json(v: &serde_json::Value) -> Context {
    match v {
        serde_json::Value::Object(map) => map.clone().into_iter().collect(),
        _ => Context::new(),
    }
}

fn primary_key_to_json(pk: &PrimaryKey) -> serde_json::Value {
    match pk {
        PrimaryKey::Int(i) => json!(i),
        PrimaryKey::String(s) => json!(s),
        PrimaryKey::Composite(scalars) => json!(scalars
            .iter()
            .map(|s| match s {
                PrimaryKeyScalar::Int(i) => json!(i),
                PrimaryKeyScalar::String(s) => json!(s),
            })
            .collect::<Vec<_>>()),
    }
}

fn primary_key_from_json(v: &serde_json::Value) -> Option<PrimaryKey> {
    match v {
        serde_json::Value::Number(n) => n.as_i64().map(PrimaryKey::Int),
        serde_json::Value::String(s) => Some(PrimaryKey::String(s.clone())),
        serde_json::Value::Array(items) => {
            let scalars: Option<Vec<PrimaryKeyScalar>> = items
                .iter()
                .map(|item| match item {
                    serde_json::Value::Number(n) => n.as_i64().map(PrimaryKeyScalar::Int),
                    serde_json::Value::String(s) => Some(PrimaryKeyScalar::String(s.clone())),
                    _ => None,
                })
                .collect();
            scalars.map(PrimaryKey::Composite)
        }
        _ => None,
    }
}

fn row_to_event(row: &tokio_postgres::Row) -> Option<Event> {
    let xid = row.get::<_, i64>("xid") as u64;
    let lsn = row.get::<_, i64>("lsn") as u64;
    let action: String = row.get("action");
    let schema: String = row.get("schema_name");
    let table: String = row.get("table_name");
    let primary_key = primary_key_from_json(&row.get::<_, serde_json::Value>("primary_key"))?;
    let old = row.get::<_, Option<serde_json::Value>>("old").as_ref().map(row_from_json).unwrap_or_default();
    let new = row.get::<_, Option<serde_json::Value>>("new").as_ref().map(row_from_json).unwrap_or_default();
    let context = context_from_json(&row.get::<_, serde_json::Value>("context"));

    match action.as_str() {
        "insert" => Some(Event::Insert { xid, lsn, context, schema, table, primary_key, new }),
        "update" => Some(Event::Update { xid, lsn, context, schema, table, primary_key, old, new }),
        "delete" => Some(Event::Delete { xid, lsn, context, schema, table, primary_key, old }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_json_roundtrip() {
        let pk = PrimaryKey::Composite(vec![PrimaryKeyScalar::Int(2), PrimaryKeyScalar::String("x".into())]);
        let json = primary_key_to_json(&pk);
        assert_eq!(primary_key_from_json(&json), Some(pk));
    }

    #[test]
    fn row_json_roundtrip() {
        let mut row = DecodedRow::new();
        row.insert("name".into(), Value::String("hi".into()));
        row.insert("age".into(), Value::Int(3));
        let json = row_to_json(&row);
        let back = row_from_json(&json);
        assert_eq!(back.get("name"), Some(&Value::String("hi".into())));
        assert_eq!(back.get("age"), Some(&Value::Int(3)));
    }
}
