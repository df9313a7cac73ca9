use pgcdc_replication::connect;
use std::time::Duration;
use tracing::warn;

/// How often the Runner advances the replication slots it supervises by
/// emitting a logical message the Replicator recognises as a liveness
/// keepalive (SPEC_FULL §4.7).
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Runs forever; the caller aborts the task's `JoinHandle` on shutdown
/// rather than threading a cancellation signal through it, since the task
/// owns no state that needs a graceful drain (SPEC_FULL §5 "a signal tears
/// down tasks forcibly").
pub async fn run_ping_task(connection_string: String) {
    loop {
        tokio::time::sleep(PING_INTERVAL).await;
        match connect::connect_metadata(&connection_string).await {
            Ok(client) => {
                if let Err(e) = client
                    .batch_execute("SELECT pg_logical_emit_message(true, 'wal_ping', '{}')")
                    .await
                {
                    warn!(error = %e, "liveness ping failed");
                }
            }
            Err(e) => warn!(error = %e, "liveness ping connection failed"),
        }
    }
}
