//! Speaks PostgreSQL's streaming-replication sub-protocol and decodes
//! `pgoutput` logical-replication messages into the row-event stream
//! defined by `pgcdc_core`.

pub mod connect;
pub mod error;
pub mod lsn;
pub mod pgoutput;
pub mod pkey;
pub mod protocol;
pub mod relation;
pub mod replicator;

pub use error::{ReplicationError, ReplicationResult};
pub use lsn::{format_lsn, parse_lsn};
pub use relation::{Column, Relation, RelationCache};
pub use replicator::{Replicator, ReplicatorConfig};
