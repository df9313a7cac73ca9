//! Watcher implementations consumed by the Replicator: a logging decorator,
//! an incremental streaming watcher, and the RecordWatcher aggregation
//! engine (SPEC_FULL §4.4-4.6).

pub mod error;
pub mod logging;
pub mod record;
pub mod streaming;

pub use error::{WatcherError, WatcherResult};
pub use logging::LoggingWatcher;
pub use record::{AggregationBackend, AggregationStrategy, MemoryBackend, RecordWatcher, RecordWatcherBuilder, TemporaryTableBackend};
pub use streaming::{EventStream, StreamingWatcher, TransactionHandler, DEFAULT_QUEUE_SIZE};
