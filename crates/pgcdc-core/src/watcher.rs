use crate::error::CoreResult;
use crate::event::Event;

/// Contract implemented by application code to receive the decoded event
/// stream. `on_event` is called synchronously, in the Replicator's task,
/// in stream order; a failure propagates up through the Replicator and
/// aborts the stream (SPEC_FULL §4.4).
pub trait Watcher: Send {
    fn on_event(&mut self, event: Event) -> CoreResult<()>;

    /// Consulted before row decoding for a table. The relation cache
    /// lookup still occurs regardless of the answer.
    fn should_watch_table(&self, _full_name: &str) -> bool {
        true
    }

    /// Consulted for every logical message, regardless of prefix.
    fn valid_context_prefix(&self, _prefix: &str) -> bool {
        true
    }
}
