//! Server-side cursors for large result sets.
//!
//! A SELECT run through a [`StreamingCursor`] is wrapped in
//! `DECLARE <name> NO SCROLL CURSOR WITHOUT HOLD FOR ...`, and each fetch
//! first pulls the requested rows over with `FETCH`. Other statements go
//! through the ordinary cursor path.

use std::fmt;

use uuid::Uuid;

use super::cursor::{CursorCore, Row, RowDict, Rows};
use super::driver::{Execution, SharedColumns, TransactionState};
use super::types::Value;
use crate::error::{Error, Result};

/// A cursor that keeps its result set on the server.
pub struct StreamingCursor {
    core: CursorCore,
    name: String,
    /// A server cursor is declared and not yet closed.
    active: bool,
}

fn is_select(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}

impl StreamingCursor {
    pub(crate) fn new(core: CursorCore) -> Self {
        Self {
            core,
            name: format!("cur_{}", Uuid::new_v4().simple()),
            active: false,
        }
    }

    /// Server-side cursor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Execute `sql`. A SELECT declares a fresh server cursor (closing the
    /// previous one) inside a transaction; nothing is fetched until asked.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Execution> {
        let sql = sql.trim();
        if !is_select(sql) {
            return self.core.run(sql, params);
        }

        self.close_server_cursor()?;
        let session = self.core.begin(Some(sql), true)?;
        let (query, params) = self.core.bind(&session, sql, params)?;
        let declare = format!(
            "DECLARE {} NO SCROLL CURSOR WITHOUT HOLD FOR {}",
            self.name, query
        );
        self.core.dispatch(&session, &declare, &params)?;
        self.active = true;
        Ok(Execution::Rows)
    }

    pub fn executemany(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<()> {
        self.core.run_many(sql, rows)
    }

    /// Pull rows into the source. Inactive cursors fetch nothing.
    fn server_fetch(&mut self, count: &str) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        let session = self.core.session()?;
        let sql = format!("FETCH {} FROM {}", count, self.name);
        self.core.dispatch(&session, &sql, &[]).map(|_| ())
    }

    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        self.server_fetch("NEXT")?;
        self.core.fetch_one()
    }

    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        self.server_fetch("ALL")?;
        self.core.fetch_all()
    }

    /// Up to `size` rows (default [`arraysize`](Self::arraysize)). On an
    /// active cursor this is everything the `FETCH <size>` returned.
    pub fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        let size = size.unwrap_or_else(|| self.core.arraysize());
        // `FETCH 0` re-reads the current row instead of reading none.
        if size == 0 {
            return Ok(Vec::new());
        }
        self.server_fetch(&size.to_string())?;
        if self.active {
            self.core.fetch_all()
        } else {
            self.core.fetch_many(size)
        }
    }

    pub fn fetchone_dict(&mut self) -> Result<Option<RowDict>> {
        let row = self.fetchone()?;
        Ok(row.map(|row| self.core.to_dict(row)))
    }

    pub fn fetchall_dict(&mut self) -> Result<Vec<RowDict>> {
        let rows = self.fetchall()?;
        Ok(rows.into_iter().map(|row| self.core.to_dict(row)).collect())
    }

    pub fn fetchmany_dict(&mut self, size: Option<usize>) -> Result<Vec<RowDict>> {
        let rows = self.fetchmany(size)?;
        Ok(rows.into_iter().map(|row| self.core.to_dict(row)).collect())
    }

    pub fn rows(&mut self) -> Rows<'_> {
        Rows::new(move || self.fetchone())
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

    /// Send `CLOSE` if a server cursor is open on a usable source.
    fn close_server_cursor(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        if !self.core.source_valid() {
            return Ok(());
        }
        let session = match self.core.session() {
            Ok(session) => session,
            // The server cursor went away with its connection.
            Err(Error::Closed(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        let sql = format!("CLOSE {}", self.name);
        self.core.dispatch(&session, &sql, &[]).map(|_| ())
    }

    /// Close the server cursor and release the source. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.core.is_closed() {
            return Ok(());
        }
        let result = self.close_server_cursor();
        self.core.close();
        result
    }

    pub fn nextset(&mut self) -> Result<()> {
        Err(Error::Unsupported("nextset() is not supported".to_string()))
    }

    pub fn setinputsizes(&mut self, _sizes: &[usize]) {}

    pub fn setoutputsize(&mut self, _size: usize, _column: Option<usize>) {}
}

impl Drop for StreamingCursor {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(cursor = %self.name, error = %err, "failed to close server cursor");
        }
    }
}

impl fmt::Debug for StreamingCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCursor")
            .field("name", &self.name)
            .field("active", &self.active)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}
