//! The Runner supervisor: groups configured slots by worker, runs them
//! in-process or across re-exec'd child processes, applies retry/backoff,
//! and answers to `SIGINT`/`SIGTERM` (SPEC_FULL §4.7).

pub mod backoff;
pub mod config;
pub mod error;
pub mod ping;
pub mod registry;
pub mod signals;
pub mod supervisor;
pub mod worker;

pub use config::{RunnerConfig, SlotConfig};
pub use error::{RunnerError, RunnerResult};
pub use registry::{WatcherFactory, WatcherRegistry};
pub use supervisor::Runner;
