use pgcdc_core::Watcher;
use std::collections::HashMap;

/// Builds a fresh watcher instance for one slot's run (a new instance per
/// retry attempt, so watchers never carry state across a restart).
pub type WatcherFactory = Box<dyn Fn() -> Box<dyn Watcher> + Send + Sync>;

/// Maps a `SlotConfig.watcher` name to the factory that builds it. Rust has
/// no runtime class loading, so the YAML `watcher: class-name` field becomes
/// a lookup key into a registry the embedding binary builds at startup from
/// its own compiled-in watcher types (see DESIGN.md). The same registry is
/// rebuilt identically in a re-exec'd worker-group process, since it is the
/// same binary running again, not a forked copy.
pub type WatcherRegistry = HashMap<String, WatcherFactory>;
