//! Cursors over a single result source.
//!
//! [`CursorCore`] holds the pipeline every cursor flavour shares: the
//! transaction guard, placeholder compilation, parameter encoding, dispatch
//! to the driver and typecasting of fetched rows. [`Cursor`] is the plain
//! facade over it; prepared and streaming cursors wrap the same core.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::connection::{ConnectionInner, Session};
use super::driver::{
    ColumnDescription, Execution, RawRow, ResultSource, SharedColumns, TransactionState,
};
use super::encoder::{ParameterEncoder, WireParam};
use super::placeholder::compile;
use super::statement::SharedSource;
use super::types::{DecodeContext, Value};
use crate::error::{Error, Result};

/// A typecast result row.
pub type Row = SmallVec<[Value; 8]>;

/// A result row keyed by column name.
pub type RowDict = HashMap<String, Value>;

/// Whether a statement modifies data and so needs an open transaction.
pub(crate) fn is_data_modifying(sql: &str) -> bool {
    let head: String = sql
        .trim_start()
        .chars()
        .take(6)
        .collect::<String>()
        .to_ascii_lowercase();
    matches!(head.as_str(), "insert" | "update" | "delete")
}

/// Refuse to run on a broken or failed transaction.
pub(crate) fn check_transaction(state: TransactionState) -> Result<()> {
    match state {
        TransactionState::Unknown => Err(Error::UnknownTransactionState),
        TransactionState::InError => Err(Error::FailedTransaction),
        _ => Ok(()),
    }
}

// ============================================================================
// Shared Core
// ============================================================================

pub(crate) struct CursorCore {
    conn: Weak<Mutex<ConnectionInner>>,
    source: SharedSource,
    /// Prepared statement sources belong to the connection's cache.
    owns_source: bool,
    closed: bool,
}

impl CursorCore {
    pub(crate) fn owned(conn: Weak<Mutex<ConnectionInner>>, source: Box<dyn ResultSource>) -> Self {
        Self {
            conn,
            source: Arc::new(Mutex::new(source)),
            owns_source: true,
            closed: false,
        }
    }

    pub(crate) fn shared(conn: Weak<Mutex<ConnectionInner>>, source: SharedSource) -> Self {
        Self {
            conn,
            source,
            owns_source: false,
            closed: false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Snapshot of the owning connection's settings.
    pub(crate) fn session(&self) -> Result<Session> {
        if self.closed {
            return Err(Error::Closed("cursor"));
        }
        let conn = self.conn.upgrade().ok_or(Error::Closed("connection"))?;
        let inner = conn.lock();
        inner.session()
    }

    /// Run `f` against the owning connection.
    pub(crate) fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut ConnectionInner) -> Result<R>,
    ) -> Result<R> {
        let conn = self.conn.upgrade().ok_or(Error::Closed("connection"))?;
        let mut inner = conn.lock();
        f(&mut inner)
    }

    /// Transaction guard. Opens a transaction on this cursor's source when
    /// the connection is idle and either `force` is set or `sql` modifies
    /// data.
    pub(crate) fn begin(&self, sql: Option<&str>, force: bool) -> Result<Session> {
        let mut session = self.session()?;
        check_transaction(session.transaction)?;
        if session.transaction == TransactionState::Idle
            && (force || sql.is_some_and(is_data_modifying))
        {
            self.dispatch(&session, "START TRANSACTION", &[])?;
            session.transaction = TransactionState::InTransaction;
        }
        Ok(session)
    }

    /// Transaction guard for prepared statements, whose sources are shared:
    /// the transaction is opened through the connection instead.
    pub(crate) fn begin_on_connection(&self) -> Result<Session> {
        let session = self.session()?;
        check_transaction(session.transaction)?;
        if session.transaction == TransactionState::Idle {
            self.with_connection(|inner| inner.run_command("START TRANSACTION"))?;
        }
        Ok(session)
    }

    /// Compile placeholders and encode parameters for one statement.
    pub(crate) fn bind(
        &self,
        session: &Session,
        sql: &str,
        params: &[Value],
    ) -> Result<(String, Vec<WireParam>)> {
        let compiled = compile(sql);
        compiled.log_diagnostics();
        let params = ParameterEncoder::new(session.encoding).encode(params)?;
        Ok((compiled.sql, params))
    }

    /// Send already-compiled SQL to the source.
    pub(crate) fn dispatch(
        &self,
        session: &Session,
        sql: &str,
        params: &[WireParam],
    ) -> Result<Execution> {
        tracing::debug!(sql, params = params.len(), "execute");
        let sql = session.encoding.encode(sql)?;
        self.source.lock().execute(Some(&sql), params)
    }

    pub(crate) fn run(&self, sql: &str, params: &[Value]) -> Result<Execution> {
        let session = self.begin(Some(sql), false)?;
        let (sql, params) = self.bind(&session, sql, params)?;
        self.dispatch(&session, &sql, &params)
    }

    pub(crate) fn run_many(&self, sql: &str, rows: &[Vec<Value>]) -> Result<()> {
        let session = self.begin(Some(sql), false)?;
        let compiled = compile(sql);
        compiled.log_diagnostics();
        let rows = ParameterEncoder::new(session.encoding).encode_many(rows)?;
        tracing::debug!(sql = %compiled.sql, rows = rows.len(), "executemany");
        let sql = session.encoding.encode(&compiled.sql)?;
        self.source.lock().executemany(Some(&sql), &rows)
    }

    /// Execute the statement already bound to the source.
    pub(crate) fn run_bound(&self, session: &Session, params: &[Value]) -> Result<Execution> {
        let params = ParameterEncoder::new(session.encoding).encode(params)?;
        self.source.lock().execute(None, &params)
    }

    pub(crate) fn run_bound_many(&self, session: &Session, rows: &[Vec<Value>]) -> Result<()> {
        let rows = ParameterEncoder::new(session.encoding).encode_many(rows)?;
        self.source.lock().executemany(None, &rows)
    }

    // ------------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------------

    pub(crate) fn fetch_one(&self) -> Result<Option<Row>> {
        let session = self.session()?;
        let (raw, columns) = {
            let mut source = self.source.lock();
            match source.fetchone()? {
                Some(raw) => (raw, source.description()),
                None => return Ok(None),
            }
        };
        typecast_row(&session, columns.as_deref().map(Vec::as_slice), raw).map(Some)
    }

    pub(crate) fn fetch_all(&self) -> Result<Vec<Row>> {
        let session = self.session()?;
        let (rows, columns) = {
            let mut source = self.source.lock();
            let rows = source.fetchall()?;
            (rows, source.description())
        };
        let columns = columns.as_deref().map(Vec::as_slice);
        rows.into_iter()
            .map(|raw| typecast_row(&session, columns, raw))
            .collect()
    }

    pub(crate) fn fetch_many(&self, size: usize) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(size.min(1024));
        while rows.len() < size {
            match self.fetch_one()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    pub(crate) fn to_dict(&self, row: Row) -> RowDict {
        let columns = self.description();
        let names = columns.iter().flat_map(|c| c.iter().map(|c| c.name.clone()));
        names.zip(row).collect()
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub(crate) fn description(&self) -> Option<SharedColumns> {
        self.source.lock().description()
    }

    pub(crate) fn rowcount(&self) -> i64 {
        self.source.lock().rowcount()
    }

    pub(crate) fn arraysize(&self) -> usize {
        self.source.lock().arraysize()
    }

    pub(crate) fn set_arraysize(&self, size: usize) {
        self.source.lock().set_arraysize(size.max(1));
    }

    pub(crate) fn valid(&self) -> bool {
        !self.closed && self.source.lock().valid()
    }

    pub(crate) fn source_valid(&self) -> bool {
        self.source.lock().valid()
    }

    pub(crate) fn transaction(&self) -> TransactionState {
        self.conn
            .upgrade()
            .map_or(TransactionState::Unknown, |conn| conn.lock().transaction())
    }

    /// Release the source. Only the first call has any effect.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.owns_source {
            self.source.lock().close();
        }
    }
}

impl Drop for CursorCore {
    fn drop(&mut self) {
        self.close();
    }
}

fn typecast_row(
    session: &Session,
    columns: Option<&[ColumnDescription]>,
    raw: RawRow,
) -> Result<Row> {
    let ctx = DecodeContext {
        encoding: session.encoding,
    };
    raw.into_iter()
        .enumerate()
        .map(|(i, value)| match columns.and_then(|c| c.get(i)) {
            Some(column) => session
                .typecasts
                .decode(column.type_oid, value.as_deref(), &ctx),
            None => Ok(value.map_or(Value::Null, Value::Raw)),
        })
        .collect()
}

// ============================================================================
// Row Iterator
// ============================================================================

/// Iterator over the remaining rows of a cursor.
///
/// Stops after the result is exhausted or after the first error.
pub struct Rows<'a> {
    next: Box<dyn FnMut() -> Result<Option<Row>> + 'a>,
    done: bool,
}

impl<'a> Rows<'a> {
    pub(crate) fn new(next: impl FnMut() -> Result<Option<Row>> + 'a) -> Self {
        Self {
            next: Box::new(next),
            done: false,
        }
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match (self.next)() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// A cursor bound to one result source of its connection.
pub struct Cursor {
    core: CursorCore,
}

impl Cursor {
    pub(crate) fn new(core: CursorCore) -> Self {
        Self { core }
    }

    /// Execute `sql` with percent-style placeholders bound to `params`.
    ///
    /// Data-modifying statements on an idle connection open a transaction
    /// first.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Execution> {
        self.core.run(sql, params)
    }

    /// Execute `sql` once per parameter row, in one driver call.
    pub fn executemany(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<()> {
        self.core.run_many(sql, rows)
    }

    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        self.core.fetch_one()
    }

    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        self.core.fetch_all()
    }

    /// Up to `size` rows; `None` uses [`Cursor::arraysize`].
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

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Release the result source. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.core.close();
    }

    /// Multiple result sets are not supported.
    pub fn nextset(&mut self) -> Result<()> {
        Err(Error::Unsupported("nextset() is not supported".to_string()))
    }

    pub fn setinputsizes(&mut self, _sizes: &[usize]) {}

    pub fn setoutputsize(&mut self, _size: usize, _column: Option<usize>) {}
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("closed", &self.core.is_closed())
            .finish_non_exhaustive()
    }
}
