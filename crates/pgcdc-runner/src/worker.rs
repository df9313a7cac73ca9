use crate::backoff::backoff_delay;
use crate::config::SlotConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::registry::WatcherRegistry;
use pgcdc_replication::{ReplicationError, Replicator, ReplicatorConfig};
use pgcdc_watchers::LoggingWatcher;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Runs every slot in one worker group as a parallel task, restarting each
/// independently on failure per its own retry policy (SPEC_FULL §4.7
/// "Per-slot worker"). Returns once every slot task has ended on its own;
/// callers normally race this against a shutdown signal and drop it, which
/// aborts the outstanding tasks via `JoinSet`'s drop behavior.
pub async fn run_group(
    connection_string: &str,
    slots: Vec<(String, SlotConfig)>,
    registry: Arc<WatcherRegistry>,
) -> RunnerResult<()> {
    for (name, slot) in &slots {
        if !registry.contains_key(&slot.watcher) {
            return Err(RunnerError::Config(format!(
                "slot '{name}' references unknown watcher '{}'",
                slot.watcher
            )));
        }
    }

    let mut tasks = JoinSet::new();
    for (name, slot) in slots {
        let connection_string = connection_string.to_string();
        let registry = registry.clone();
        tasks.spawn(async move { run_slot_with_retry(connection_string, name, slot, registry).await });
    }

    while tasks.join_next().await.is_some() {}
    Ok(())
}

/// Restarts a single slot forever, applying the backoff formula both to
/// error retries and, when `auto_restart` is set, to normal completions.
async fn run_slot_with_retry(
    connection_string: String,
    slot_name: String,
    slot: SlotConfig,
    registry: Arc<WatcherRegistry>,
) {
    let factory = registry.get(&slot.watcher).expect("watcher validated by run_group");
    let mut attempt: u32 = 0;

    loop {
        let effective_slot_name = if slot.temporary {
            format!("{slot_name}_{:04x}", rand::random::<u16>())
        } else {
            slot_name.clone()
        };

        let repl_config = ReplicatorConfig {
            connection_string: connection_string.clone(),
            slot_name: effective_slot_name,
            publications: slot.publications.clone(),
            temporary: slot.temporary,
        };
        let mut replicator = Replicator::new(repl_config);
        let mut watcher = LoggingWatcher::new(slot_name.clone(), factory());

        info!(slot = %slot_name, attempt, "starting replication slot");
        match replicator.replicate_forever(&mut watcher).await {
            Ok(()) => {
                if !slot.auto_restart {
                    info!(slot = %slot_name, "slot ended normally, auto_restart disabled");
                    return;
                }
                info!(slot = %slot_name, "slot ended normally, restarting");
                tokio::time::sleep(backoff_delay(slot.retry_backoff, slot.retry_backoff_exponent, 1)).await;
            }
            Err(e) => {
                error!(slot = %slot_name, error = %e, "slot failed");
                if matches!(e, ReplicationError::InvalidConfig(_)) {
                    error!(slot = %slot_name, "non-retriable configuration error, terminating process");
                    terminate_self();
                    return;
                }
                attempt += 1;
                if let Some(max_retries) = slot.retries {
                    if attempt >= max_retries {
                        error!(slot = %slot_name, attempt, "retries exhausted, terminating process");
                        terminate_self();
                        return;
                    }
                }
                let delay = backoff_delay(slot.retry_backoff, slot.retry_backoff_exponent, attempt);
                warn!(slot = %slot_name, delay_secs = delay.as_secs_f64(), "retrying slot after backoff");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Sends `SIGTERM` to this process, the same shutdown path an external
/// signal would take (SPEC_FULL §4.7: "the worker raises and sends SIGTERM
/// to the current process").
fn terminate_self() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Err(e) = kill(Pid::this(), Signal::SIGTERM) {
        error!(error = %e, "failed to signal own process for shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgcdc_core::{CoreResult, Event, Watcher};

    struct NoopWatcher;
    impl Watcher for NoopWatcher {
        fn on_event(&mut self, _event: Event) -> CoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_group_rejects_unregistered_watcher() {
        let slot = SlotConfig {
            watcher: "missing".into(),
            publications: vec!["pub1".into()],
            temporary: false,
            worker: "default".into(),
            auto_restart: true,
            retries: None,
            retry_backoff: 1.0,
            retry_backoff_exponent: None,
        };
        let registry: WatcherRegistry = WatcherRegistry::new();
        let result = run_group("postgres://x", vec![("slot_a".into(), slot)], Arc::new(registry)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_group_accepts_known_watcher_and_empty_slot_list() {
        let mut registry: WatcherRegistry = WatcherRegistry::new();
        registry.insert("noop".into(), Box::new(|| Box::new(NoopWatcher) as Box<dyn Watcher>));
        let result = run_group("postgres://x", vec![], Arc::new(registry)).await;
        assert!(result.is_ok());
    }
}
