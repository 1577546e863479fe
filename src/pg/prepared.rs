//! Cursors over server-side prepared statements.

use std::fmt;
use std::sync::Weak;

use parking_lot::Mutex;

use super::connection::ConnectionInner;
use super::cursor::{CursorCore, Row, RowDict, Rows};
use super::driver::{Execution, SharedColumns, TransactionState};
use super::statement::PreparedStatement;
use super::types::Value;
use crate::error::{Error, Result};

/// A cursor bound to a cached prepared statement.
///
/// The statement text is fixed, so [`execute`](Self::execute) only takes
/// parameters. The underlying source belongs to the connection's statement
/// cache and stays alive until the connection closes.
pub struct PreparedCursor {
    core: CursorCore,
    name: String,
    query: String,
}

impl PreparedCursor {
    pub(crate) fn new(conn: Weak<Mutex<ConnectionInner>>, statement: &PreparedStatement) -> Self {
        Self {
            core: CursorCore::shared(conn, statement.source.clone()),
            name: statement.name.clone(),
            query: statement.query.clone(),
        }
    }

    /// Server-side statement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized query text the statement was prepared from.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn execute(&mut self, params: &[Value]) -> Result<Execution> {
        let session = self.core.begin_on_connection()?;
        tracing::debug!(statement = %self.name, params = params.len(), "execute prepared");
        self.core.run_bound(&session, params)
    }

    pub fn executemany(&mut self, rows: &[Vec<Value>]) -> Result<()> {
        let session = self.core.begin_on_connection()?;
        tracing::debug!(statement = %self.name, rows = rows.len(), "executemany prepared");
        self.core.run_bound_many(&session, rows)
    }

    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        self.core.fetch_one()
    }

    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        self.core.fetch_all()
    }

    pub fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        let size = size.unwrap_or_else(|| self.core.arraysize());
        self.core.fetch_many(size)
    }

    pub fn fetchone_dict(&mut self) -> Result<Option<RowDict>> {
        Ok(self.core.fetch_one()?.map(|row| self.core.to_dict(row)))
    }

    pub fn fetchall_dict(&mut self) -> Result<Vec<RowDict>> {
        let rows = self.core.fetch_all()?;
        Ok(rows.into_iter().map(|row| self.core.to_dict(row)).collect())
    }

    pub fn fetchmany_dict(&mut self, size: Option<usize>) -> Result<Vec<RowDict>> {
        let rows = self.fetchmany(size)?;
        Ok(rows.into_iter().map(|row| self.core.to_dict(row)).collect())
    }

    pub fn rows(&mut self) -> Rows<'_> {
        Rows::new(move || self.core.fetch_one())
    }

    pub fn description(&self) -> Option<SharedColumns> {
        self.core.description()
    }

    pub fn rowcount(&self) -> i64 {
        self.core.rowcount()
    }

    pub fn arraysize(&self) -> usize {
        self.core.arraysize()
    }

    pub fn set_arraysize(&mut self, size: usize) {
        self.core.set_arraysize(size);
    }

    pub fn valid(&self) -> bool {
        self.core.valid()
    }

    pub fn transaction(&self) -> TransactionState {
        self.core.transaction()
    }

    /// Detach from the statement. The statement itself is deallocated when
    /// the connection closes.
    pub fn close(&mut self) {
        self.core.close();
    }

    pub fn nextset(&mut self) -> Result<()> {
        Err(Error::Unsupported("nextset() is not supported".to_string()))
    }

    pub fn setinputsizes(&mut self, _sizes: &[usize]) {}

    pub fn setoutputsize(&mut self, _size: usize, _column: Option<usize>) {}
}

impl fmt::Debug for PreparedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedCursor")
            .field("name", &self.name)
            .field("query", &self.query)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}
