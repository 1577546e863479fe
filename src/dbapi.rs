//! DB-API 2.0 style module surface.
//!
//! Module constants, the exception class taxonomy used by
//! [`ErrorKind::dbapi_class`](crate::ErrorKind::dbapi_class), type-code
//! comparators for column descriptions, and the standard type constructors.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};
use crate::pg::config::ConnectOptions;
use crate::pg::connection::Connection;
use crate::pg::driver::{ColumnDescription, Driver};
use crate::pg::types::Oid;

pub const APILEVEL: &str = "2.0";

/// Threads may share the module but not connections.
pub const THREADSAFETY: u8 = 1;

/// Percent-style placeholders (`%s`), compiled to positional `$n`.
pub const PARAMSTYLE: &str = "format";

/// Non-error advisories, such as placeholder diagnostics.
pub type Warning = crate::pg::placeholder::Diagnostic;

/// Open a connection through `driver`.
pub fn connect(driver: &dyn Driver, options: &ConnectOptions) -> Result<Connection> {
    tracing::debug!(
        database = options.database.as_deref().unwrap_or(""),
        host = options.host.as_deref().unwrap_or(""),
        port = options.port,
        "connecting"
    );
    let conn = driver.connect(options)?;
    Connection::open(conn, options)
}

// ============================================================================
// Exception Classes
// ============================================================================

/// DB-API 2.0 exception class names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbApiClass {
    Error,
    InterfaceError,
    DatabaseError,
    DataError,
    OperationalError,
    IntegrityError,
    InternalError,
    ProgrammingError,
    NotSupportedError,
}

impl DbApiClass {
    /// Whether this class is `DatabaseError` or one of its subclasses.
    pub fn is_database_error(self) -> bool {
        !matches!(self, DbApiClass::Error | DbApiClass::InterfaceError)
    }
}

impl fmt::Display for DbApiClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// Type Codes
// ============================================================================

/// A set of type names that compares equal to any member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeCode(&'static [&'static str]);

pub const STRING: TypeCode = TypeCode(&["string"]);
pub const BINARY: TypeCode = TypeCode(&["binary"]);
pub const NUMBER: TypeCode = TypeCode(&[
    "integer", "long", "double", "numeric", "money", "bool",
]);
pub const DATETIME: TypeCode = TypeCode(&["date", "datetime", "time", "interval"]);
pub const ROWID: TypeCode = TypeCode(&["oid"]);

impl TypeCode {
    pub fn names(&self) -> &'static [&'static str] {
        self.0
    }

    pub fn matches(&self, oid: Oid) -> bool {
        oid.type_name().is_some_and(|name| self.0.contains(&name))
    }
}

impl PartialEq<Oid> for TypeCode {
    fn eq(&self, oid: &Oid) -> bool {
        self.matches(*oid)
    }
}

impl PartialEq<TypeCode> for Oid {
    fn eq(&self, code: &TypeCode) -> bool {
        code.matches(*self)
    }
}

impl PartialEq<ColumnDescription> for TypeCode {
    fn eq(&self, column: &ColumnDescription) -> bool {
        self.matches(column.type_oid)
    }
}

// ============================================================================
// Type Constructors
// ============================================================================

fn out_of_range(what: &str) -> Error {
    Error::Range(format!("{} out of range", what))
}

pub fn date(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| out_of_range("date"))
}

pub fn time(hour: u32, minute: u32, second: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| out_of_range("time"))
}

pub fn timestamp(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Result<NaiveDateTime> {
    Ok(date(year, month, day)?.and_time(time(hour, minute, second)?))
}

pub fn binary(data: impl Into<Bytes>) -> Bytes {
    data.into()
}

/// UTC timestamp `ticks` seconds after the epoch.
pub fn timestamp_from_ticks(ticks: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp(ticks, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| out_of_range("timestamp"))
}

pub fn date_from_ticks(ticks: i64) -> Result<NaiveDate> {
    timestamp_from_ticks(ticks).map(|ts| ts.date())
}

pub fn time_from_ticks(ticks: i64) -> Result<NaiveTime> {
    timestamp_from_ticks(ticks).map(|ts| ts.time())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_constants() {
        assert_eq!(APILEVEL, "2.0");
        assert_eq!(THREADSAFETY, 1);
        assert_eq!(PARAMSTYLE, "format");
    }

    #[test]
    fn test_type_codes() {
        assert!(STRING == Oid::TEXT);
        assert!(STRING == Oid::VARCHAR);
        assert!(BINARY == Oid::BYTEA);
        assert!(NUMBER == Oid::INT4);
        assert!(NUMBER == Oid::NUMERIC);
        assert!(NUMBER == Oid::FLOAT8);
        assert!(DATETIME == Oid::TIMESTAMP);
        assert!(DATETIME == Oid::INTERVAL);
        assert!(ROWID == Oid::OID_TYPE);
        assert!(Oid::DATE == DATETIME);

        assert!(STRING != Oid::INT4);
        assert!(NUMBER != Oid::TEXT);
        assert!(DATETIME != Oid(424242));
    }

    #[test]
    fn test_type_code_against_column() {
        let column = ColumnDescription::new("created", Oid::DATE);
        assert!(DATETIME == column);
        assert!(NUMBER != column);
    }

    #[test]
    fn test_constructors() {
        assert_eq!(date(1979, 7, 7).unwrap().to_string(), "1979-07-07");
        assert!(date(1979, 2, 30).is_err());
        assert_eq!(time(22, 0, 12).unwrap().to_string(), "22:00:12");
        assert!(time(25, 0, 0).is_err());
        assert_eq!(
            timestamp(1979, 7, 7, 22, 0, 12).unwrap().to_string(),
            "1979-07-07 22:00:12"
        );
        assert_eq!(&binary(vec![0xf8u8, 0x00])[..], &[0xf8, 0x00]);
    }

    #[test]
    fn test_from_ticks_uses_utc() {
        assert_eq!(
            timestamp_from_ticks(0).unwrap().to_string(),
            "1970-01-01 00:00:00"
        );
        assert_eq!(date_from_ticks(86_400 * 365).unwrap().to_string(), "1971-01-01");
        assert_eq!(time_from_ticks(3_661).unwrap().to_string(), "01:01:01");
    }

    #[test]
    fn test_class_hierarchy() {
        assert!(DbApiClass::IntegrityError.is_database_error());
        assert!(!DbApiClass::InterfaceError.is_database_error());
        assert_eq!(DbApiClass::ProgrammingError.to_string(), "ProgrammingError");
    }
}
