//! The protocol driver seam.
//!
//! Wire transport, authentication and the native protocol codec live behind
//! these traits. The access layer only ever talks to a [`Driver`], the
//! [`DriverConnection`] it opens, and the [`ResultSource`]s that connection
//! hands out.

use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use super::config::ConnectOptions;
use super::encoder::WireParam;
use super::large_object::{LoFd, LoMode};
use super::types::Oid;
use crate::error::Result;

// ============================================================================
// Transaction State
// ============================================================================

/// Transaction status as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// The connection is bad or its state cannot be determined
    Unknown,
    /// Idle (not in a transaction block)
    Idle,
    /// A command is in progress
    Active,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    InError,
}

impl TransactionState {
    /// Whether a transaction block is already open (healthy or not).
    pub fn in_block(self) -> bool {
        matches!(self, TransactionState::InTransaction | TransactionState::Active)
    }
}

/// Decode the ReadyForQuery status byte.
impl From<u8> for TransactionState {
    fn from(b: u8) -> Self {
        match b {
            b'I' => TransactionState::Idle,
            b'T' => TransactionState::InTransaction,
            b'E' => TransactionState::InError,
            b'A' => TransactionState::Active,
            _ => TransactionState::Unknown,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Unknown => "unknown",
            TransactionState::Idle => "idle",
            TransactionState::Active => "active",
            TransactionState::InTransaction => "in transaction",
            TransactionState::InError => "in error",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Result Metadata
// ============================================================================

/// One column of a result set, in DB-API `description` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub type_oid: Oid,
    pub display_size: Option<i32>,
    pub internal_size: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub null_ok: Option<bool>,
}

impl ColumnDescription {
    /// A column with only a name and type known.
    pub fn new(name: impl Into<String>, type_oid: Oid) -> Self {
        Self {
            name: name.into(),
            type_oid,
            display_size: None,
            internal_size: None,
            precision: None,
            scale: None,
            null_ok: None,
        }
    }
}

/// Shared column descriptions, cloned cheaply into every fetch.
pub type SharedColumns = Arc<Vec<ColumnDescription>>;

/// A row exactly as the driver returns it: text wire values, `None` for NULL.
pub type RawRow = Vec<Option<Bytes>>;

/// Outcome of executing a statement on a result source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// A command completed; carries the affected row count.
    RowCount(u64),
    /// The statement produced rows that can now be fetched.
    Rows,
}

/// Outcome of executing a statement directly on a connection.
pub enum DriverResponse {
    RowCount(u64),
    Source(Box<dyn ResultSource>),
}

impl fmt::Debug for DriverResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverResponse::RowCount(n) => f.debug_tuple("RowCount").field(n).finish(),
            DriverResponse::Source(_) => f.write_str("Source(..)"),
        }
    }
}

// ============================================================================
// Driver Traits
// ============================================================================

/// A stateful result handle owned by exactly one cursor (or, for prepared
/// statements, by the connection's statement cache).
pub trait ResultSource: Send {
    /// Execute `sql`, or the bound statement when `sql` is `None`.
    fn execute(&mut self, sql: Option<&[u8]>, params: &[WireParam]) -> Result<Execution>;

    /// Execute once per parameter row in a single driver call.
    fn executemany(&mut self, sql: Option<&[u8]>, rows: &[Vec<WireParam>]) -> Result<()>;

    /// Next row of the current result, `None` once exhausted.
    fn fetchone(&mut self) -> Result<Option<RawRow>>;

    /// Every remaining row of the current result.
    fn fetchall(&mut self) -> Result<Vec<RawRow>>;

    /// Columns of the current result; `None` when the last statement
    /// returned no rows.
    fn description(&self) -> Option<SharedColumns>;

    /// Rows affected or returned by the last statement, `-1` before any.
    fn rowcount(&self) -> i64;

    fn arraysize(&self) -> usize;

    fn set_arraysize(&mut self, size: usize);

    /// Whether the handle is still usable on the server.
    fn valid(&self) -> bool;

    /// Release the handle. Called exactly once by the owner.
    fn close(&mut self);
}

/// An open session with the server.
pub trait DriverConnection: Send {
    /// Run a statement outside any cursor.
    fn execute(&mut self, sql: &[u8], params: &[WireParam]) -> Result<DriverResponse>;

    /// A fresh, unexecuted result source.
    fn source(&mut self) -> Result<Box<dyn ResultSource>>;

    /// Prepare `sql` server-side under `name`; the returned source executes it.
    fn prepare(&mut self, sql: &[u8], name: &str) -> Result<Box<dyn ResultSource>>;

    /// Current transaction status.
    fn transaction(&self) -> TransactionState;

    /// Run a `COPY ... FROM STDIN` statement feeding it `chunks` of COPY text.
    /// Returns the number of rows copied.
    fn copy_in(&mut self, sql: &[u8], chunks: &mut dyn Iterator<Item = Bytes>) -> Result<u64>;

    /// Whether the session is still healthy.
    fn is_ok(&self) -> bool;

    /// Server notices received since the last call, oldest first.
    fn take_notices(&mut self) -> Vec<String>;

    // ------------------------------------------------------------------------
    // Large objects
    // ------------------------------------------------------------------------

    fn lo_create(&mut self, mode: LoMode) -> Result<Oid>;

    /// Create a large object from a client-side file.
    fn lo_import(&mut self, path: &Path) -> Result<Oid>;

    /// Write a large object's contents to a client-side file.
    fn lo_export(&mut self, oid: Oid, path: &Path) -> Result<()>;

    fn lo_unlink(&mut self, oid: Oid) -> Result<()>;

    fn lo_open(&mut self, oid: Oid, mode: LoMode) -> Result<LoFd>;

    fn lo_close(&mut self, fd: LoFd) -> Result<()>;

    /// Up to `len` bytes from the current position.
    fn lo_read(&mut self, fd: LoFd, len: usize) -> Result<Bytes>;

    /// Returns the number of bytes written.
    fn lo_write(&mut self, fd: LoFd, data: &[u8]) -> Result<usize>;

    /// Move the position; returns the new offset from the start.
    fn lo_seek(&mut self, fd: LoFd, pos: SeekFrom) -> Result<u64>;

    fn lo_tell(&mut self, fd: LoFd) -> Result<u64>;

    fn close(&mut self) -> Result<()>;
}

/// Opens connections.
pub trait Driver {
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn DriverConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_state_from_status_byte() {
        assert_eq!(TransactionState::from(b'I'), TransactionState::Idle);
        assert_eq!(TransactionState::from(b'T'), TransactionState::InTransaction);
        assert_eq!(TransactionState::from(b'E'), TransactionState::InError);
        assert_eq!(TransactionState::from(b'A'), TransactionState::Active);
        assert_eq!(TransactionState::from(b'?'), TransactionState::Unknown);
    }

    #[test]
    fn test_in_block() {
        assert!(TransactionState::InTransaction.in_block());
        assert!(TransactionState::Active.in_block());
        assert!(!TransactionState::Idle.in_block());
        assert!(!TransactionState::InError.in_block());
    }
}
