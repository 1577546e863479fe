//! In-memory driver for tests.
//!
//! Understands just enough SQL to exercise the access layer: transaction
//! control, `CREATE TABLE`, `INSERT ... VALUES`, `SELECT * FROM`,
//! `DELETE FROM`, server-side cursors, `DEALLOCATE`, `SET` and `COPY`, plus
//! large objects over a virtual client filesystem. Every statement is logged,
//! and failures can be injected by substring.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::config::ConnectOptions;
use super::driver::{
    ColumnDescription, Driver, DriverConnection, DriverResponse, Execution, RawRow, ResultSource,
    SharedColumns, TransactionState,
};
use super::encoder::WireParam;
use super::escape::escape_bytea;
use super::large_object::{LoFd, LoMode};
use super::types::Oid;
use crate::dbapi::DbApiClass;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Table {
    columns: Vec<ColumnDescription>,
    rows: Vec<RawRow>,
}

#[derive(Debug)]
struct ServerCursor {
    columns: SharedColumns,
    rows: VecDeque<RawRow>,
}

#[derive(Debug)]
struct OpenLargeObject {
    oid: Oid,
    mode: LoMode,
    pos: u64,
}

/// Server-side state shared by the connection and all its sources.
#[derive(Debug)]
pub(crate) struct MockState {
    pub transaction: TransactionState,
    /// Every statement received, in order.
    pub log: Vec<String>,
    /// Statements containing any of these substrings fail.
    pub fail_on: Vec<String>,
    /// Prepared statement names whose handles report invalid.
    pub invalidated: HashSet<String>,
    /// Prepared statement names currently allocated.
    pub prepared: HashSet<String>,
    pub sources_closed: usize,
    pub closed: bool,
    /// Notices not yet collected by the connection.
    pub notices: Vec<String>,
    /// Large object contents by OID.
    pub large_objects: HashMap<Oid, Vec<u8>>,
    /// Client-side files for `lo_import` and `lo_export`.
    pub files: HashMap<PathBuf, Vec<u8>>,
    tables: HashMap<String, Table>,
    cursors: HashMap<String, ServerCursor>,
    descriptors: HashMap<LoFd, OpenLargeObject>,
    next_oid: i32,
    next_fd: LoFd,
}

enum Outcome {
    Command,
    RowCount(u64),
    Rows(SharedColumns, Vec<RawRow>),
}

fn error(class: DbApiClass, message: impl Into<String>) -> Error {
    Error::driver(class, message)
}

fn column_type(name: &str) -> Result<Oid> {
    let oid = match name.to_ascii_lowercase().as_str() {
        "bool" | "boolean" => Oid::BOOL,
        "integer" | "int" | "int4" => Oid::INT4,
        "bigint" | "int8" => Oid::INT8,
        "double" | "float8" => Oid::FLOAT8,
        "numeric" => Oid::NUMERIC,
        "money" => Oid::MONEY,
        "text" => Oid::TEXT,
        "varchar" => Oid::VARCHAR,
        "bytea" => Oid::BYTEA,
        "date" => Oid::DATE,
        "time" => Oid::TIME,
        "timestamp" => Oid::TIMESTAMP,
        "interval" => Oid::INTERVAL,
        "uuid" => Oid::UUID,
        "json" => Oid::JSON,
        "text[]" => Oid::TEXT_ARRAY,
        "integer[]" => Oid::INT4_ARRAY,
        other => {
            return Err(error(
                DbApiClass::ProgrammingError,
                format!("type \"{}\" does not exist", other),
            ))
        }
    };
    Ok(oid)
}

fn param_text(param: &WireParam) -> Option<Bytes> {
    match param {
        WireParam::Null => None,
        WireParam::Text(bytes) => Some(bytes.clone()),
        WireParam::Binary(bytes) => Some(Bytes::from(escape_bytea(bytes))),
        WireParam::Typed(value) => value.to_wire_text().map(Bytes::from),
    }
}

fn word_at<'a>(words: &[&'a str], i: usize) -> Result<&'a str> {
    words
        .get(i)
        .copied()
        .ok_or_else(|| error(DbApiClass::ProgrammingError, "syntax error"))
}

fn unescape_copy(field: &str) -> Option<Bytes> {
    if field == "\\N" {
        return None;
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(Bytes::from(out))
}

impl MockState {
    fn new() -> Self {
        Self {
            transaction: TransactionState::Idle,
            log: Vec::new(),
            fail_on: Vec::new(),
            invalidated: HashSet::new(),
            prepared: HashSet::new(),
            sources_closed: 0,
            closed: false,
            notices: Vec::new(),
            large_objects: HashMap::new(),
            files: HashMap::new(),
            tables: HashMap::new(),
            cursors: HashMap::new(),
            descriptors: HashMap::new(),
            next_oid: 16384,
            next_fd: 0,
        }
    }

    /// Log `sql` and apply injected failures and transaction rules.
    fn admit(&mut self, sql: &str) -> Result<()> {
        self.log.push(sql.to_string());
        if self.closed {
            return Err(error(DbApiClass::InterfaceError, "connection closed"));
        }
        let verb = sql.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
        let ends_block = verb == "COMMIT" || verb == "ROLLBACK";
        if self.transaction == TransactionState::InError && !ends_block {
            return Err(error(
                DbApiClass::InternalError,
                "current transaction is aborted, commands ignored until end of transaction block",
            ));
        }
        if let Some(pattern) = self.fail_on.iter().find(|p| sql.contains(p.as_str())) {
            let message = format!("injected failure on {:?}", pattern);
            return Err(self.fail(message));
        }
        Ok(())
    }

    /// A statement failed: an open transaction is now aborted.
    fn fail(&mut self, message: String) -> Error {
        if self.transaction == TransactionState::InTransaction {
            self.transaction = TransactionState::InError;
        }
        error(DbApiClass::ProgrammingError, message)
    }

    fn run(&mut self, sql: &str, params: &[WireParam]) -> Result<Outcome> {
        self.admit(sql)?;
        match self.dispatch(sql, params) {
            Ok(outcome) => Ok(outcome),
            Err(Error::Driver { message, .. }) => Err(self.fail(message)),
            Err(err) => Err(err),
        }
    }

    fn dispatch(&mut self, sql: &str, params: &[WireParam]) -> Result<Outcome> {
        let words: Vec<&str> = sql.split_whitespace().collect();
        let verb = words.first().map(|w| w.to_ascii_uppercase()).unwrap_or_default();
        let word = |i: usize| word_at(&words, i);

        match verb.as_str() {
            "START" | "BEGIN" => {
                if self.transaction.in_block() {
                    self.notice("WARNING:  there is already a transaction in progress");
                }
                self.transaction = TransactionState::InTransaction;
                Ok(Outcome::Command)
            }
            "COMMIT" | "ROLLBACK" => {
                if self.transaction == TransactionState::Idle {
                    self.notice("WARNING:  there is no transaction in progress");
                }
                self.transaction = TransactionState::Idle;
                self.cursors.clear();
                self.descriptors.clear();
                Ok(Outcome::Command)
            }
            "SET" => Ok(Outcome::Command),
            "CREATE" => self.create_table(sql),
            "INSERT" => {
                let table = self.table(word(2)?)?;
                if params.len() != table.columns.len() {
                    return Err(error(
                        DbApiClass::ProgrammingError,
                        format!(
                            "INSERT has {} values for {} columns",
                            params.len(),
                            table.columns.len()
                        ),
                    ));
                }
                let row = params.iter().map(param_text).collect();
                self.table_mut(word(2)?)?.rows.push(row);
                Ok(Outcome::RowCount(1))
            }
            "SELECT" => {
                let table = self.table(word(3)?)?;
                Ok(Outcome::Rows(
                    Arc::new(table.columns.clone()),
                    table.rows.clone(),
                ))
            }
            "DELETE" => {
                let table = self.table_mut(word(2)?)?;
                let count = table.rows.len() as u64;
                table.rows.clear();
                Ok(Outcome::RowCount(count))
            }
            "DECLARE" => {
                let name = word(1)?.to_string();
                let query = sql
                    .find(" FOR ")
                    .map(|pos| &sql[pos + 5..])
                    .ok_or_else(|| error(DbApiClass::ProgrammingError, "syntax error"))?;
                match self.dispatch(query, params)? {
                    Outcome::Rows(columns, rows) => {
                        self.cursors.insert(
                            name,
                            ServerCursor {
                                columns,
                                rows: rows.into(),
                            },
                        );
                        Ok(Outcome::Command)
                    }
                    _ => Err(error(DbApiClass::ProgrammingError, "cursor query must be a SELECT")),
                }
            }
            "FETCH" => {
                let count = word(1)?.to_ascii_uppercase();
                let cursor = self.cursor_mut(word(3)?)?;
                let take = match count.as_str() {
                    "NEXT" => 1,
                    "ALL" => cursor.rows.len(),
                    n => n
                        .parse::<usize>()
                        .map_err(|_| error(DbApiClass::ProgrammingError, "syntax error"))?,
                };
                let take = take.min(cursor.rows.len());
                let rows = cursor.rows.drain(..take).collect();
                Ok(Outcome::Rows(Arc::clone(&cursor.columns), rows))
            }
            "CLOSE" => {
                let name = word(1)?;
                self.cursors.remove(name).map(|_| Outcome::Command).ok_or_else(|| {
                    error(
                        DbApiClass::ProgrammingError,
                        format!("cursor \"{}\" does not exist", name),
                    )
                })
            }
            "DEALLOCATE" => {
                let name = word(1)?;
                if self.prepared.remove(name) {
                    Ok(Outcome::Command)
                } else {
                    Err(error(
                        DbApiClass::ProgrammingError,
                        format!("prepared statement \"{}\" does not exist", name),
                    ))
                }
            }
            _ => Err(error(DbApiClass::ProgrammingError, "syntax error")),
        }
    }

    fn notice(&mut self, message: &str) {
        self.notices.push(format!("{}\n", message));
    }

    // ------------------------------------------------------------------------
    // Large objects
    // ------------------------------------------------------------------------

    fn lo_new(&mut self, data: Vec<u8>) -> Oid {
        let oid = Oid(self.next_oid);
        self.next_oid += 1;
        self.large_objects.insert(oid, data);
        oid
    }

    fn lo_exists(&mut self, oid: Oid) -> Result<()> {
        if self.large_objects.contains_key(&oid) {
            Ok(())
        } else {
            Err(self.fail(format!("large object {} does not exist", oid)))
        }
    }

    fn descriptor(&mut self, fd: LoFd) -> Result<&mut OpenLargeObject> {
        if !self.descriptors.contains_key(&fd) {
            return Err(self.fail(format!("invalid large-object descriptor: {}", fd)));
        }
        self.descriptors
            .get_mut(&fd)
            .ok_or_else(|| error(DbApiClass::InternalError, "descriptor vanished"))
    }

    fn lo_open(&mut self, oid: Oid, mode: LoMode) -> Result<LoFd> {
        self.admit(&format!("<lo_open {}>", oid))?;
        self.lo_exists(oid)?;
        let fd = self.next_fd;
        self.next_fd += 1;
        self.descriptors
            .insert(fd, OpenLargeObject { oid, mode, pos: 0 });
        Ok(fd)
    }

    fn lo_read(&mut self, fd: LoFd, len: usize) -> Result<Bytes> {
        self.admit(&format!("<lo_read {} {}>", fd, len))?;
        let open = self.descriptor(fd)?;
        if !open.mode.contains(LoMode::READ) {
            return Err(error(
                DbApiClass::ProgrammingError,
                format!("large object descriptor {} was not opened for reading", fd),
            ));
        }
        let (oid, start) = (open.oid, open.pos as usize);
        let data = self.large_objects.get(&oid).map(Vec::as_slice).unwrap_or(&[]);
        let end = start.saturating_add(len).min(data.len()).max(start);
        let chunk = Bytes::copy_from_slice(data.get(start..end).unwrap_or(&[]));
        self.descriptor(fd)?.pos += chunk.len() as u64;
        Ok(chunk)
    }

    fn lo_write(&mut self, fd: LoFd, bytes: &[u8]) -> Result<usize> {
        self.admit(&format!("<lo_write {} {}>", fd, bytes.len()))?;
        let open = self.descriptor(fd)?;
        if !open.mode.contains(LoMode::WRITE) {
            return Err(error(
                DbApiClass::ProgrammingError,
                format!("large object descriptor {} was not opened for writing", fd),
            ));
        }
        let (oid, start) = (open.oid, open.pos as usize);
        open.pos += bytes.len() as u64;
        let data = self.large_objects.entry(oid).or_default();
        if data.len() < start + bytes.len() {
            data.resize(start + bytes.len(), 0);
        }
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn lo_seek(&mut self, fd: LoFd, pos: SeekFrom) -> Result<u64> {
        self.admit(&format!("<lo_lseek {} {:?}>", fd, pos))?;
        let open = self.descriptor(fd)?;
        let (current, oid) = (open.pos as i64, open.oid);
        let size = self.large_objects.get(&oid).map_or(0, Vec::len) as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => current + delta,
            SeekFrom::End(delta) => size + delta,
        };
        if target < 0 {
            return Err(self.fail("invalid seek offset".to_string()));
        }
        self.descriptor(fd)?.pos = target as u64;
        Ok(target as u64)
    }

    fn create_table(&mut self, sql: &str) -> Result<Outcome> {
        let syntax = || error(DbApiClass::ProgrammingError, "syntax error");
        let open = sql.find('(').ok_or_else(syntax)?;
        let close = sql.rfind(')').ok_or_else(syntax)?;
        let name = sql[..open].split_whitespace().nth(2).ok_or_else(syntax)?;
        let columns = sql[open + 1..close]
            .split(',')
            .map(|def| {
                let mut parts = def.split_whitespace();
                let column = parts.next().ok_or_else(syntax)?;
                let ty = parts.next().ok_or_else(syntax)?;
                Ok(ColumnDescription::new(column, column_type(ty)?))
            })
            .collect::<Result<Vec<_>>>()?;
        self.tables.insert(
            name.to_string(),
            Table {
                columns,
                rows: Vec::new(),
            },
        );
        Ok(Outcome::Command)
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| {
            error(
                DbApiClass::ProgrammingError,
                format!("relation \"{}\" does not exist", name),
            )
        })
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables.get_mut(name).ok_or_else(|| {
            error(
                DbApiClass::ProgrammingError,
                format!("relation \"{}\" does not exist", name),
            )
        })
    }

    fn cursor_mut(&mut self, name: &str) -> Result<&mut ServerCursor> {
        self.cursors.get_mut(name).ok_or_else(|| {
            error(
                DbApiClass::ProgrammingError,
                format!("cursor \"{}\" does not exist", name),
            )
        })
    }

    fn copy_in(&mut self, sql: &str, data: &[u8]) -> Result<u64> {
        self.admit(sql)?;
        let syntax = || error(DbApiClass::ProgrammingError, "syntax error");
        let name = sql.split_whitespace().nth(1).ok_or_else(syntax)?.to_string();
        let table = self.table(&name)?;
        let width = table.columns.len();
        let positions: Vec<usize> = match (sql.find('('), sql.find(')')) {
            (Some(open), Some(close)) => sql[open + 1..close]
                .split(',')
                .map(|c| {
                    let c = c.trim();
                    table
                        .columns
                        .iter()
                        .position(|col| col.name == c)
                        .ok_or_else(syntax)
                })
                .collect::<Result<_>>()?,
            _ => (0..width).collect(),
        };

        let text = String::from_utf8_lossy(data).into_owned();
        let mut count = 0;
        for line in text.lines() {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != positions.len() {
                return Err(error(DbApiClass::DataError, "missing data for column"));
            }
            let mut row: RawRow = vec![None; width];
            for (field, &pos) in fields.iter().zip(&positions) {
                row[pos] = unescape_copy(field);
            }
            self.table_mut(&name)?.rows.push(row);
            count += 1;
        }
        Ok(count)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// A driver whose connections all share one in-memory server.
#[derive(Clone)]
pub(crate) struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new())),
        }
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, MockState> {
        self.state.lock()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Number of logged statements starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }

    pub fn fail_on(&self, pattern: &str) {
        self.state.lock().fail_on.push(pattern.to_string());
    }

    pub fn set_transaction(&self, state: TransactionState) {
        self.state.lock().transaction = state;
    }

    /// Queue a server notice for the connection to collect.
    pub fn notice(&self, message: &str) {
        self.state.lock().notice(message);
    }

    /// Place a file on the virtual client filesystem.
    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.state.lock().files.insert(PathBuf::from(path), data.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(Path::new(path)).cloned()
    }

    /// A source not tied to any connection.
    pub fn detached_source(&self) -> Box<dyn ResultSource> {
        Box::new(MockSource::new(Arc::clone(&self.state), None))
    }
}

impl Driver for MockDriver {
    fn connect(&self, _options: &ConnectOptions) -> Result<Box<dyn DriverConnection>> {
        let mut state = self.state.lock();
        state.closed = false;
        state.transaction = TransactionState::Idle;
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl DriverConnection for MockConnection {
    fn execute(&mut self, sql: &[u8], params: &[WireParam]) -> Result<DriverResponse> {
        let sql = String::from_utf8_lossy(sql);
        let outcome = self.state.lock().run(&sql, params)?;
        match outcome {
            Outcome::Command => Ok(DriverResponse::RowCount(0)),
            Outcome::RowCount(n) => Ok(DriverResponse::RowCount(n)),
            Outcome::Rows(columns, rows) => {
                let mut source = MockSource::new(Arc::clone(&self.state), None);
                source.load(columns, rows);
                Ok(DriverResponse::Source(Box::new(source)))
            }
        }
    }

    fn source(&mut self) -> Result<Box<dyn ResultSource>> {
        Ok(Box::new(MockSource::new(Arc::clone(&self.state), None)))
    }

    fn prepare(&mut self, sql: &[u8], name: &str) -> Result<Box<dyn ResultSource>> {
        let sql = String::from_utf8_lossy(sql).into_owned();
        let mut state = self.state.lock();
        state.admit(&format!("PREPARE {} AS {}", name, sql))?;
        state.prepared.insert(name.to_string());
        drop(state);
        Ok(Box::new(MockSource::new(
            Arc::clone(&self.state),
            Some((name.to_string(), sql)),
        )))
    }

    fn transaction(&self) -> TransactionState {
        self.state.lock().transaction
    }

    fn copy_in(&mut self, sql: &[u8], chunks: &mut dyn Iterator<Item = Bytes>) -> Result<u64> {
        let sql = String::from_utf8_lossy(sql).into_owned();
        let data: Vec<u8> = chunks.flat_map(|chunk| chunk.to_vec()).collect();
        self.state.lock().copy_in(&sql, &data)
    }

    fn is_ok(&self) -> bool {
        let state = self.state.lock();
        !state.closed && state.transaction != TransactionState::Unknown
    }

    fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().notices)
    }

    fn lo_create(&mut self, _mode: LoMode) -> Result<Oid> {
        let mut state = self.state.lock();
        state.admit("<lo_creat>")?;
        Ok(state.lo_new(Vec::new()))
    }

    fn lo_import(&mut self, path: &Path) -> Result<Oid> {
        let mut state = self.state.lock();
        state.admit(&format!("<lo_import {}>", path.display()))?;
        let data = state.files.get(path).cloned().ok_or_else(|| {
            error(
                DbApiClass::OperationalError,
                format!("could not open file \"{}\"", path.display()),
            )
        })?;
        Ok(state.lo_new(data))
    }

    fn lo_export(&mut self, oid: Oid, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.admit(&format!("<lo_export {} {}>", oid, path.display()))?;
        state.lo_exists(oid)?;
        let data = state.large_objects.get(&oid).cloned().unwrap_or_default();
        state.files.insert(path.to_path_buf(), data);
        Ok(())
    }

    fn lo_unlink(&mut self, oid: Oid) -> Result<()> {
        let mut state = self.state.lock();
        state.admit(&format!("<lo_unlink {}>", oid))?;
        state.lo_exists(oid)?;
        state.large_objects.remove(&oid);
        Ok(())
    }

    fn lo_open(&mut self, oid: Oid, mode: LoMode) -> Result<LoFd> {
        self.state.lock().lo_open(oid, mode)
    }

    fn lo_close(&mut self, fd: LoFd) -> Result<()> {
        let mut state = self.state.lock();
        state.admit(&format!("<lo_close {}>", fd))?;
        state.descriptor(fd)?;
        state.descriptors.remove(&fd);
        Ok(())
    }

    fn lo_read(&mut self, fd: LoFd, len: usize) -> Result<Bytes> {
        self.state.lock().lo_read(fd, len)
    }

    fn lo_write(&mut self, fd: LoFd, data: &[u8]) -> Result<usize> {
        self.state.lock().lo_write(fd, data)
    }

    fn lo_seek(&mut self, fd: LoFd, pos: SeekFrom) -> Result<u64> {
        self.state.lock().lo_seek(fd, pos)
    }

    fn lo_tell(&mut self, fd: LoFd) -> Result<u64> {
        let mut state = self.state.lock();
        state.admit(&format!("<lo_tell {}>", fd))?;
        Ok(state.descriptor(fd)?.pos)
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push("<close>".to_string());
        state.closed = true;
        Ok(())
    }
}

// ============================================================================
// Result Source
// ============================================================================

struct MockSource {
    state: Arc<Mutex<MockState>>,
    /// Name and text of the bound prepared statement.
    prepared: Option<(String, String)>,
    columns: Option<SharedColumns>,
    rows: VecDeque<RawRow>,
    rowcount: i64,
    arraysize: usize,
    closed: bool,
}

impl MockSource {
    fn new(state: Arc<Mutex<MockState>>, prepared: Option<(String, String)>) -> Self {
        Self {
            state,
            prepared,
            columns: None,
            rows: VecDeque::new(),
            rowcount: -1,
            arraysize: 1,
            closed: false,
        }
    }

    fn load(&mut self, columns: SharedColumns, rows: Vec<RawRow>) {
        self.rowcount = rows.len() as i64;
        self.columns = Some(columns);
        self.rows = rows.into();
    }

    fn statement(&self, sql: Option<&[u8]>) -> Result<String> {
        match (sql, &self.prepared) {
            (Some(sql), _) => Ok(String::from_utf8_lossy(sql).into_owned()),
            (None, Some((_, query))) => Ok(query.clone()),
            (None, None) => Err(error(DbApiClass::ProgrammingError, "no statement to execute")),
        }
    }
}

impl ResultSource for MockSource {
    fn execute(&mut self, sql: Option<&[u8]>, params: &[WireParam]) -> Result<Execution> {
        let sql = self.statement(sql)?;
        let outcome = self.state.lock().run(&sql, params)?;
        match outcome {
            Outcome::Rows(columns, rows) => {
                self.load(columns, rows);
                Ok(Execution::Rows)
            }
            Outcome::RowCount(n) => {
                self.columns = None;
                self.rows.clear();
                self.rowcount = n as i64;
                Ok(Execution::RowCount(n))
            }
            Outcome::Command => {
                self.columns = None;
                self.rows.clear();
                self.rowcount = -1;
                Ok(Execution::RowCount(0))
            }
        }
    }

    fn executemany(&mut self, sql: Option<&[u8]>, rows: &[Vec<WireParam>]) -> Result<()> {
        let sql = self.statement(sql)?;
        let mut total = 0;
        let mut state = self.state.lock();
        for params in rows {
            if let Outcome::RowCount(n) = state.run(&sql, params)? {
                total += n as i64;
            }
        }
        self.columns = None;
        self.rows.clear();
        self.rowcount = total;
        Ok(())
    }

    fn fetchone(&mut self) -> Result<Option<RawRow>> {
        Ok(self.rows.pop_front())
    }

    fn fetchall(&mut self) -> Result<Vec<RawRow>> {
        Ok(self.rows.drain(..).collect())
    }

    fn description(&self) -> Option<SharedColumns> {
        self.columns.clone()
    }

    fn rowcount(&self) -> i64 {
        self.rowcount
    }

    fn arraysize(&self) -> usize {
        self.arraysize
    }

    fn set_arraysize(&mut self, size: usize) {
        self.arraysize = size;
    }

    fn valid(&self) -> bool {
        let state = self.state.lock();
        let invalidated = self
            .prepared
            .as_ref()
            .is_some_and(|(name, _)| state.invalidated.contains(name));
        !self.closed && !state.closed && !invalidated
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().sources_closed += 1;
        }
    }
}
