//! PostgreSQL access layer over a pluggable protocol driver.
//!
//! This module provides DB-API style cursors and connections that:
//! - Open transactions implicitly before data-modifying statements
//! - Compile percent-style placeholders to positional `$n` markers
//! - Typecast text wire values into rich Rust values
//! - Cache prepared statements per connection
//! - Stream large SELECTs through server-side cursors
//!
//! Architecture:
//! - `driver`: Traits the protocol driver implements
//! - `config`: Connection options
//! - `types` / `typecast` / `interval` / `numeric`: Wire type registry and decoders
//! - `placeholder` / `encoder` / `escape`: Outbound SQL and parameters
//! - `cursor` / `prepared` / `streaming`: Cursor flavours
//! - `statement`: Prepared statement cache
//! - `connection`: Transaction lifecycle and cursor factories
//! - `large_object`: Large object handles

pub mod config;
pub mod connection;
pub mod cursor;
pub mod driver;
pub mod encoder;
pub mod escape;
pub mod interval;
pub mod large_object;
pub mod numeric;
pub mod placeholder;
pub mod prepared;
pub mod statement;
pub mod streaming;
pub mod typecast;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use config::ConnectOptions;
pub use connection::{Connection, Executed};
pub use cursor::{Cursor, Row, RowDict, Rows};
pub use driver::{
    ColumnDescription, Driver, DriverConnection, DriverResponse, Execution, RawRow, ResultSource,
    SharedColumns, TransactionState,
};
pub use encoder::{ClientEncoding, ParameterEncoder, WireParam};
pub use interval::Interval;
pub use large_object::{LargeObject, LoFd, LoMode};
pub use numeric::Numeric;
pub use placeholder::{compile, CompiledSql, Diagnostic};
pub use prepared::PreparedCursor;
pub use streaming::StreamingCursor;
pub use types::{DecodeContext, Decoder, Oid, TypeKey, TypeRegistry, Value};
