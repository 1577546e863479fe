//! pgsql - DB-API style PostgreSQL access layer.
//!
//! Cursors and connections on top of a native protocol driver supplied
//! through the [`pg::Driver`] traits. The layer manages the implicit
//! transaction lifecycle, compiles `%s` placeholders, encodes parameters and
//! typecasts results into dates, intervals, exact numerics, arrays and
//! binary values.

pub mod dbapi;
mod error;
pub mod pg;
pub mod registry;

pub use dbapi::{connect, DbApiClass};
pub use error::{Error, ErrorKind, Result};
pub use pg::{
    ClientEncoding, ConnectOptions, Connection, Cursor, Executed, Execution, Interval, LargeObject,
    LoMode, Numeric, Oid, PreparedCursor, Row, StreamingCursor, TransactionState, TypeRegistry,
    Value,
};
pub use registry::{close_all, ConnectionId};
