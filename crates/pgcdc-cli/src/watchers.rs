use pgcdc_core::{CoreResult, Event, Watcher};
use pgcdc_runner::WatcherRegistry;
use tracing::info;

/// Watcher that discards every event after logging its arrival. Stands in
/// for the application-specific watchers a real deployment registers under
/// its own keys; kept here so `start` has at least one usable `watcher:`
/// value out of the box.
struct NoopWatcher;

impl Watcher for NoopWatcher {
    fn on_event(&mut self, event: Event) -> CoreResult<()> {
        info!(?event, "noop watcher received event");
        Ok(())
    }
}

/// Builds the registry the CLI starts with. Embedding code that links its
/// own watchers in place of this binary would populate this map with its
/// own factories instead (SPEC_FULL §9, on the YAML `watcher:` field having
/// no class-loading equivalent here).
pub fn default_registry() -> WatcherRegistry {
    let mut registry: WatcherRegistry = WatcherRegistry::new();
    registry.insert("noop".to_string(), Box::new(|| Box::new(NoopWatcher)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_noop_watcher() {
        let registry = default_registry();
        assert!(registry.contains_key("noop"));
        let mut watcher = registry["noop"]();
        assert!(watcher.should_watch_table("public.orders"));
    }
}
