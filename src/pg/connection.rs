//! Connections.
//!
//! This module provides the connection type that handles:
//! - The implicit transaction lifecycle (commit/rollback reopen a transaction)
//! - Cursor factories (plain, prepared, streaming)
//! - The prepared statement cache and its teardown
//! - Client encoding and the connection-scoped typecast registry
//! - Large objects and server notices

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use super::config::ConnectOptions;
use super::cursor::{check_transaction, Cursor, CursorCore};
use super::driver::{DriverConnection, DriverResponse, ResultSource, TransactionState};
use super::encoder::{ClientEncoding, ParameterEncoder};
use super::escape;
use super::large_object::{LargeObject, LoMode};
use super::placeholder::compile;
use super::prepared::PreparedCursor;
use super::statement::{PreparedStatement, StatementCache};
use super::streaming::StreamingCursor;
use super::types::{Oid, TypeRegistry, Value};
use crate::error::{Error, Result};
use crate::registry::{ConnectionId, Registry};

// ============================================================================
// Shared State
// ============================================================================

/// What a cursor needs to know about its connection for one operation.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub transaction: TransactionState,
    pub encoding: ClientEncoding,
    pub typecasts: Arc<TypeRegistry>,
}

/// Connection state shared (weakly) with every cursor.
pub(crate) struct ConnectionInner {
    id: ConnectionId,
    /// `None` once closed
    driver: Option<Box<dyn DriverConnection>>,
    statements: StatementCache,
    encoding: ClientEncoding,
    typecasts: Arc<TypeRegistry>,
    arraysize: usize,
    /// Captured server notices; `None` while capture is off.
    notices: Option<Vec<String>>,
}

impl ConnectionInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.driver.is_none()
    }

    pub(crate) fn driver(&mut self) -> Result<&mut (dyn DriverConnection + 'static)> {
        self.driver
            .as_deref_mut()
            .ok_or(Error::Closed("connection"))
    }

    pub(crate) fn transaction(&self) -> TransactionState {
        self.driver
            .as_ref()
            .map_or(TransactionState::Unknown, |driver| driver.transaction())
    }

    pub(crate) fn session(&self) -> Result<Session> {
        if self.is_closed() {
            return Err(Error::Closed("connection"));
        }
        Ok(Session {
            transaction: self.transaction(),
            encoding: self.encoding,
            typecasts: Arc::clone(&self.typecasts),
        })
    }

    /// Run a parameterless command, discarding any rows it returns.
    pub(crate) fn run_command(&mut self, sql: &str) -> Result<()> {
        let encoding = self.encoding;
        run_command(self.driver()?, encoding, sql)
    }

    fn new_source(&mut self) -> Result<Box<dyn ResultSource>> {
        let arraysize = self.arraysize;
        let mut source = self.driver()?.source()?;
        source.set_arraysize(arraysize);
        Ok(source)
    }

    /// Roll back, deallocate cached statements, close the driver connection
    /// and leave the registry. Cleanup failures are logged, not returned;
    /// only the final driver close can fail.
    pub(crate) fn close(&mut self) -> Result<()> {
        let mut driver = self.driver.take().ok_or(Error::Closed("connection"))?;
        let encoding = self.encoding;
        tracing::debug!(connection = %self.id, "closing connection");

        if matches!(
            driver.transaction(),
            TransactionState::InError | TransactionState::InTransaction
        ) {
            if let Err(err) = run_command(driver.as_mut(), encoding, "ROLLBACK") {
                tracing::warn!(connection = %self.id, error = %err, "rollback on close failed");
            }
        }

        for statement in self.statements.drain() {
            let mut source = statement.source.lock();
            if source.valid() {
                let sql = format!("DEALLOCATE {}", statement.name);
                if let Err(err) = run_command(driver.as_mut(), encoding, &sql) {
                    tracing::warn!(
                        statement = %statement.name,
                        error = %err,
                        "deallocate failed, rolling back"
                    );
                    if let Err(err) = run_command(driver.as_mut(), encoding, "ROLLBACK") {
                        tracing::warn!(error = %err, "rollback after failed deallocate failed");
                    }
                }
            }
            source.close();
        }

        Registry::global().unregister(self.id);
        driver.close()
    }
}

fn run_command(
    driver: &mut dyn DriverConnection,
    encoding: ClientEncoding,
    sql: &str,
) -> Result<()> {
    tracing::debug!(sql, "execute");
    let bytes = encoding.encode(sql)?;
    if let DriverResponse::Source(mut source) = driver.execute(&bytes, &[])? {
        source.close();
    }
    Ok(())
}

// ============================================================================
// Connection
// ============================================================================

/// Result of [`Connection::execute`].
#[derive(Debug)]
pub enum Executed {
    /// A command completed, affecting this many rows.
    RowCount(u64),
    /// The statement returned rows, readable through this cursor.
    Cursor(Cursor),
}

/// A database connection.
///
/// PostgreSQL autocommits anything outside a transaction block; this type
/// simulates autocommit-off by opening a transaction before data-modifying
/// statements and immediately after every commit or rollback.
pub struct Connection {
    id: ConnectionId,
    options: ConnectOptions,
    inner: Arc<Mutex<ConnectionInner>>,
}

impl Connection {
    /// Wrap an open driver connection.
    pub fn open(driver: Box<dyn DriverConnection>, options: &ConnectOptions) -> Result<Self> {
        let encoding = options.encoding()?;
        let id = ConnectionId::new();
        let inner = ConnectionInner {
            id,
            driver: Some(driver),
            statements: StatementCache::new(),
            encoding: ClientEncoding::default(),
            typecasts: Arc::new(TypeRegistry::new()),
            arraysize: options.arraysize.max(1),
            notices: None,
        };
        let conn = Self {
            id,
            options: options.clone(),
            inner: Arc::new(Mutex::new(inner)),
        };
        conn.join(Registry::global());
        tracing::debug!(connection = %id, "connection opened");

        if encoding != ClientEncoding::default() {
            conn.switch_encoding(encoding)?;
        }
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed()
    }

    /// Add this connection to `registry`.
    pub(crate) fn join(&self, registry: &Registry) {
        registry.register(self.id, &self.inner);
    }

    fn weak(&self) -> Weak<Mutex<ConnectionInner>> {
        Arc::downgrade(&self.inner)
    }

    /// Current transaction status; `Unknown` once closed.
    pub fn transaction(&self) -> TransactionState {
        self.inner.lock().transaction()
    }

    /// Database name; the user name when none was given.
    pub fn dbname(&self) -> &str {
        self.options
            .database
            .as_deref()
            .or(self.options.user.as_deref())
            .unwrap_or("")
    }

    pub fn host(&self) -> &str {
        self.options.host.as_deref().unwrap_or("localhost")
    }

    pub fn port(&self) -> u16 {
        self.options.port
    }

    /// Backend options sent at connection time.
    pub fn options(&self) -> Option<&str> {
        self.options.options.as_deref()
    }

    pub fn tty(&self) -> Option<&str> {
        self.options.tty.as_deref()
    }

    /// Whether the connection is open and healthy.
    pub fn status(&self) -> bool {
        let inner = self.inner.lock();
        inner.driver.as_ref().is_some_and(|driver| driver.is_ok())
    }

    /// Start (or stop) capturing server notices. Either way the captured
    /// list starts over. Returns the new setting.
    pub fn set_notices(&self, enabled: bool) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.driver()?.take_notices();
        inner.notices = enabled.then(Vec::new);
        Ok(enabled)
    }

    /// Notices captured since capture was switched on, oldest first. Empty
    /// while capture is off.
    pub fn notices(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        let fresh = inner.driver()?.take_notices();
        match inner.notices.as_mut() {
            Some(captured) => {
                captured.extend(fresh);
                Ok(captured.clone())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Execute a statement directly. Unlike cursors this never opens a
    /// transaction, but it refuses to run on a failed or unknown one.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<Executed> {
        let mut inner = self.inner.lock();
        check_transaction(inner.session()?.transaction)?;
        let encoding = inner.encoding;
        let arraysize = inner.arraysize;

        let compiled = compile(sql);
        compiled.log_diagnostics();
        let params = ParameterEncoder::new(encoding).encode(params)?;
        let bytes = encoding.encode(&compiled.sql)?;

        tracing::debug!(sql = %compiled.sql, params = params.len(), "execute");
        match inner.driver()?.execute(&bytes, &params)? {
            DriverResponse::RowCount(n) => Ok(Executed::RowCount(n)),
            DriverResponse::Source(mut source) => {
                source.set_arraysize(arraysize);
                Ok(Executed::Cursor(Cursor::new(CursorCore::owned(
                    self.weak(),
                    source,
                ))))
            }
        }
    }

    pub fn cursor(&self) -> Result<Cursor> {
        let source = self.inner.lock().new_source()?;
        Ok(Cursor::new(CursorCore::owned(self.weak(), source)))
    }

    /// A cursor that streams SELECT results from a server-side cursor.
    pub fn streaming_cursor(&self) -> Result<StreamingCursor> {
        let source = self.inner.lock().new_source()?;
        Ok(StreamingCursor::new(CursorCore::owned(self.weak(), source)))
    }

    /// Prepare `sql` once per connection and return a cursor bound to it.
    ///
    /// Statements are keyed by their trimmed, placeholder-compiled text and
    /// named `prep<n>`. Preparing opens a transaction if none is open.
    pub fn prepare(&self, sql: &str) -> Result<PreparedCursor> {
        let mut inner = self.inner.lock();
        let encoding = inner.encoding;

        let compiled = compile(sql.trim());
        compiled.log_diagnostics();
        let query = compiled.sql;

        let statement = match inner.statements.get(&query) {
            Some(statement) => {
                tracing::trace!(statement = %statement.name, "statement cache hit");
                statement
            }
            None => {
                let name = inner.statements.next_statement_name();
                tracing::debug!(statement = %name, sql = %query, "prepare");
                let bytes = encoding.encode(&query)?;
                let mut source = inner.driver()?.prepare(&bytes, &name)?;
                source.set_arraysize(inner.arraysize);
                inner.statements.insert(PreparedStatement {
                    name,
                    query,
                    source: Arc::new(Mutex::new(source)),
                })
            }
        };

        if inner.transaction() == TransactionState::Idle {
            inner.run_command("START TRANSACTION")?;
        }
        Ok(PreparedCursor::new(self.weak(), &statement))
    }

    /// Number of statements in the prepared statement cache.
    pub fn prepared_statements(&self) -> usize {
        self.inner.lock().statements.len()
    }

    /// Commit, then open the next transaction.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.run_command("COMMIT")?;
        inner.run_command("START TRANSACTION")
    }

    /// Roll back, then open the next transaction.
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.run_command("ROLLBACK")?;
        inner.run_command("START TRANSACTION")
    }

    /// Close the connection and everything it owns. Every later operation
    /// fails with a closed-connection error.
    pub fn close(&self) -> Result<()> {
        self.inner.lock().close()
    }

    pub fn encoding(&self) -> ClientEncoding {
        self.inner.lock().encoding
    }

    /// Change the client encoding, on the server and for parameter encoding
    /// and string decoding.
    pub fn set_encoding(&self, label: &str) -> Result<()> {
        self.switch_encoding(ClientEncoding::from_label(label)?)
    }

    fn switch_encoding(&self, encoding: ClientEncoding) -> Result<()> {
        let mut inner = self.inner.lock();
        let sql = format!("SET SESSION client_encoding TO '{}'", encoding.pg_name());
        inner.run_command(&sql)?;
        inner.encoding = encoding;
        Ok(())
    }

    /// The typecast registry used for rows fetched from now on.
    pub fn typecasts(&self) -> Arc<TypeRegistry> {
        Arc::clone(&self.inner.lock().typecasts)
    }

    /// Mutable access to the typecast registry. Do not hold the guard while
    /// using cursors of this connection.
    pub fn typecasts_mut(&self) -> MappedMutexGuard<'_, TypeRegistry> {
        MutexGuard::map(self.inner.lock(), |inner| Arc::make_mut(&mut inner.typecasts))
    }

    /// Run `COPY ... FROM STDIN`, streaming `chunks` of COPY text format.
    pub fn copy_in<I>(&self, sql: &str, chunks: I) -> Result<u64>
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let mut inner = self.inner.lock();
        let bytes = inner.encoding.encode(sql)?;
        tracing::debug!(sql, "copy in");
        let mut chunks = chunks.into_iter().map(Into::<Bytes>::into);
        inner.driver()?.copy_in(&bytes, &mut chunks)
    }

    /// Load `rows` into `table` with COPY. `columns` defaults to every
    /// column in table order. Returns the number of rows loaded.
    pub fn bulkload(
        &self,
        table: &str,
        rows: &[Vec<Value>],
        columns: Option<&[&str]>,
    ) -> Result<u64> {
        let sql = match columns {
            Some(columns) => format!("COPY {} ({}) FROM STDIN", table, columns.join(", ")),
            None => format!("COPY {} FROM STDIN", table),
        };
        let encoding = self.encoding();
        let chunks = rows
            .iter()
            .map(|row| encoding.encode(&copy_line(row)))
            .collect::<Result<Vec<Bytes>>>()?;
        self.copy_in(&sql, chunks)
    }

    /// Create a new, empty large object.
    pub fn locreate(&self, mode: LoMode) -> Result<LargeObject> {
        let mode = LoMode::from_bits(mode.bits());
        let oid = self.inner.lock().driver()?.lo_create(mode)?;
        tracing::debug!(oid = %oid, "large object created");
        Ok(LargeObject::new(self.weak(), oid))
    }

    /// A handle for the existing large object `oid`.
    pub fn getlo(&self, oid: Oid) -> Result<LargeObject> {
        if self.is_closed() {
            return Err(Error::Closed("connection"));
        }
        if oid.0 == 0 {
            return Err(Error::LargeObject("the object oid can't be null".to_string()));
        }
        Ok(LargeObject::new(self.weak(), oid))
    }

    /// Create a large object from the client-side file at `path`.
    pub fn loimport(&self, path: impl AsRef<Path>) -> Result<LargeObject> {
        let path = path.as_ref();
        let oid = self.inner.lock().driver()?.lo_import(path)?;
        tracing::debug!(oid = %oid, path = %path.display(), "large object imported");
        Ok(LargeObject::new(self.weak(), oid))
    }

    pub fn escape_string(&self, value: &str) -> String {
        escape::escape_string(value)
    }

    pub fn escape_bytea(&self, data: &[u8]) -> String {
        escape::escape_bytea(data)
    }

    pub fn unescape_bytea(&self, text: &[u8]) -> Result<Bytes> {
        escape::unescape_bytea(text)
    }
}

/// One row in COPY text format, newline-terminated.
fn copy_line(row: &[Value]) -> String {
    let mut line = String::new();
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            line.push('\t');
        }
        match value.to_wire_text() {
            None => line.push_str("\\N"),
            Some(text) => {
                for c in text.chars() {
                    match c {
                        '\\' => line.push_str("\\\\"),
                        '\t' => line.push_str("\\t"),
                        '\n' => line.push_str("\\n"),
                        '\r' => line.push_str("\\r"),
                        c => line.push(c),
                    }
                }
            }
        }
    }
    line.push('\n');
    line
}

impl Drop for Connection {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if inner.is_closed() {
            return;
        }
        if let Err(err) = inner.close() {
            tracing::warn!(connection = %self.id, error = %err, "close on drop failed");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &inner.is_closed())
            .field("encoding", &inner.encoding)
            .field("statements", &inner.statements)
            .finish()
    }
}
