pub mod decode;
pub mod error;
pub mod event;
pub mod value;
pub mod watcher;

pub use error::{CoreError, CoreResult};
pub use event::{
    full_table_name, Context, DecodedRow, Event, Lsn, PrimaryKey, PrimaryKeyScalar, Xid,
};
pub use value::Value;
pub use watcher::Watcher;
