use crate::config::{RunnerConfig, SlotConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::ping;
use crate::registry::WatcherRegistry;
use crate::signals;
use crate::worker;
use futures_util::future::{select_all, FutureExt};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Set on a re-exec'd worker-group child together with [`WORKER_CONFIG_ENV`]
/// so it knows which slots to run instead of starting as the parent.
pub const WORKER_GROUP_ENV: &str = "PGCDC_WORKER_GROUP";
const WORKER_CONFIG_ENV: &str = "PGCDC_WORKER_CONFIG";

/// Orchestrates every configured replication slot: groups them by their
/// `worker` attribute, runs a single group in-process or one child process
/// per group otherwise, and applies retry/backoff and signal handling
/// (SPEC_FULL §4.7).
pub struct Runner {
    config: RunnerConfig,
    registry: Arc<WatcherRegistry>,
}

impl Runner {
    pub fn new(config: RunnerConfig, registry: WatcherRegistry) -> Self {
        Runner { config, registry: Arc::new(registry) }
    }

    /// Reads the environment a re-exec'd worker-group child was launched
    /// with. The embedding binary should call this at startup, before
    /// parsing its own CLI arguments, and dispatch to
    /// [`Runner::run_worker_group`] when it returns `Some`.
    pub fn internal_worker_invocation() -> Option<(RunnerConfig, String)> {
        let group = std::env::var(WORKER_GROUP_ENV).ok()?;
        let json = std::env::var(WORKER_CONFIG_ENV).ok()?;
        let config: RunnerConfig = serde_json::from_str(&json).ok()?;
        Some((config, group))
    }

    /// Top-level entry point for the parent process.
    pub async fn start(self) -> RunnerResult<()> {
        let groups = self.config.groups();
        let connection_string = self.config.connection_string.clone();
        let ping = tokio::spawn(ping::run_ping_task(connection_string.clone()));

        if groups.len() <= 1 {
            let slots = groups.into_values().next().unwrap_or_default();
            let registry = self.registry.clone();
            tokio::select! {
                _ = signals::wait_for_termination() => info!("received shutdown signal"),
                result = worker::run_group(&connection_string, slots, registry) => {
                    if let Err(e) = result {
                        error!(error = %e, "worker group failed");
                    }
                }
            }
        } else {
            self.run_multi_process(groups).await?;
        }

        ping.abort();
        Ok(())
    }

    /// Entry point for a re-exec'd worker-group child: runs exactly the
    /// slots belonging to `group` and handles signals on its own, since it
    /// has no parent relationship to the process that spawned it beyond
    /// being its child (SPEC_FULL §4.7 "after-fork hook").
    pub async fn run_worker_group(self, group: String) -> RunnerResult<()> {
        let connection_string = self.config.connection_string.clone();
        let slots = self.config.groups().remove(&group).unwrap_or_default();
        let registry = self.registry;

        tokio::select! {
            _ = signals::wait_for_termination() => info!(group = %group, "worker group received shutdown signal"),
            result = worker::run_group(&connection_string, slots, registry) => {
                if let Err(e) = result {
                    error!(group = %group, error = %e, "worker group failed");
                }
            }
        }
        Ok(())
    }

    async fn run_multi_process(
        &self,
        groups: HashMap<String, Vec<(String, SlotConfig)>>,
    ) -> RunnerResult<()> {
        let mut children = Vec::new();
        for group_name in groups.keys() {
            let child = self.spawn_child(group_name)?;
            children.push((group_name.clone(), child));
        }

        wait_for_termination_or_child_exit(&mut children).await;
        terminate_children(&mut children).await;
        Ok(())
    }

    /// The parent never opens a database connection of its own before this
    /// call, which is the entire "before-fork hook" this implementation
    /// needs (SPEC_FULL §9): re-exec starts the child with a clean process
    /// image, so there is nothing to close.
    fn spawn_child(&self, group: &str) -> RunnerResult<tokio::process::Child> {
        let exe = std::env::current_exe().map_err(|e| RunnerError::Spawn(e.to_string()))?;
        let group_config = self.config.for_group(group);
        let json = serde_json::to_string(&group_config)?;

        tokio::process::Command::new(exe)
            .env(WORKER_GROUP_ENV, group)
            .env(WORKER_CONFIG_ENV, json)
            .spawn()
            .map_err(|e| RunnerError::Spawn(e.to_string()))
    }
}

async fn wait_for_termination_or_child_exit(children: &mut [(String, tokio::process::Child)]) {
    let waits = children
        .iter_mut()
        .map(|(name, child)| {
            let name = name.clone();
            async move { (name, child.wait().await) }.boxed()
        })
        .collect::<Vec<_>>();

    if waits.is_empty() {
        signals::wait_for_termination().await;
        return;
    }

    tokio::select! {
        _ = signals::wait_for_termination() => info!("received shutdown signal"),
        (result, _idx, _rest) = select_all(waits) => {
            let (name, status) = result;
            warn!(group = %name, ?status, "worker group process exited, shutting down remaining groups");
        }
    }
}

async fn terminate_children(children: &mut [(String, tokio::process::Child)]) {
    for (name, child) in children.iter_mut() {
        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                if e != Errno::ESRCH {
                    warn!(group = %name, error = %e, "failed to signal worker group process");
                }
            }
        }
        match child.wait().await {
            Ok(status) => debug!(group = %name, ?status, "worker group process exited"),
            Err(e) => warn!(group = %name, error = %e, "error waiting for worker group process"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(worker: &str, watcher: &str) -> SlotConfig {
        SlotConfig {
            watcher: watcher.into(),
            publications: vec!["pub1".into()],
            temporary: false,
            worker: worker.into(),
            auto_restart: true,
            retries: None,
            retry_backoff: 1.0,
            retry_backoff_exponent: None,
        }
    }

    #[test]
    #[serial_test::serial]
    fn internal_worker_invocation_is_none_without_env_vars() {
        std::env::remove_var(WORKER_GROUP_ENV);
        std::env::remove_var(WORKER_CONFIG_ENV);
        assert!(Runner::internal_worker_invocation().is_none());
    }

    #[test]
    #[serial_test::serial]
    fn internal_worker_invocation_roundtrips_through_env_vars() {
        let mut slots = HashMap::new();
        slots.insert("a".to_string(), slot("ingest", "noop"));
        let config = RunnerConfig { connection_string: "postgres://x".into(), slots };
        let json = serde_json::to_string(&config).unwrap();

        std::env::set_var(WORKER_GROUP_ENV, "ingest");
        std::env::set_var(WORKER_CONFIG_ENV, &json);

        let (decoded, group) = Runner::internal_worker_invocation().unwrap();
        assert_eq!(group, "ingest");
        assert_eq!(decoded.connection_string, "postgres://x");
        assert!(decoded.slots.contains_key("a"));

        std::env::remove_var(WORKER_GROUP_ENV);
        std::env::remove_var(WORKER_CONFIG_ENV);
    }
}
