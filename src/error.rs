//! Error types for the pgsql access layer.
//!
//! Every failure is a single [`Error`] whose [`ErrorKind`] tells callers what
//! went wrong; [`ErrorKind::dbapi_class`] maps it onto the DB-API 2.0
//! exception names for host code that wants them.

use thiserror::Error;

use crate::dbapi::DbApiClass;

#[derive(Error, Debug)]
pub enum Error {
    /// Operation on a closed connection or cursor.
    #[error("{0} already closed")]
    Closed(&'static str),

    #[error("Invalid/Unknown database connection")]
    UnknownTransactionState,

    #[error("Invalid transaction state. Exception not cleared by COMMIT or ROLLBACK")]
    FailedTransaction,

    /// Malformed wire value while typecasting.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Range error: {0}")]
    Range(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Misuse or failure of a large object handle.
    #[error("Large object error: {0}")]
    LargeObject(String),

    /// Failure reported by the protocol driver.
    #[error("{class}: {message}")]
    Driver { class: DbApiClass, message: String },
}

/// What kind of failure an [`Error`] is, independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionClosed,
    UnknownTransactionState,
    FailedTransaction,
    Parse,
    Range,
    UnsupportedFeature,
    Encoding,
    Config,
    LargeObject,
    Driver(DbApiClass),
}

impl ErrorKind {
    /// The DB-API 2.0 exception class this kind corresponds to.
    pub fn dbapi_class(self) -> DbApiClass {
        match self {
            ErrorKind::ConnectionClosed | ErrorKind::Config => DbApiClass::InterfaceError,
            ErrorKind::UnknownTransactionState => DbApiClass::DatabaseError,
            ErrorKind::FailedTransaction => DbApiClass::ProgrammingError,
            ErrorKind::Parse | ErrorKind::Range | ErrorKind::Encoding => DbApiClass::DataError,
            ErrorKind::UnsupportedFeature => DbApiClass::NotSupportedError,
            ErrorKind::LargeObject => DbApiClass::OperationalError,
            ErrorKind::Driver(class) => class,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Closed(_) => ErrorKind::ConnectionClosed,
            Error::UnknownTransactionState => ErrorKind::UnknownTransactionState,
            Error::FailedTransaction => ErrorKind::FailedTransaction,
            Error::Parse(_) => ErrorKind::Parse,
            Error::Range(_) => ErrorKind::Range,
            Error::Unsupported(_) => ErrorKind::UnsupportedFeature,
            Error::Encoding(_) => ErrorKind::Encoding,
            Error::Config(_) => ErrorKind::Config,
            Error::LargeObject(_) => ErrorKind::LargeObject,
            Error::Driver { class, .. } => ErrorKind::Driver(*class),
        }
    }

    /// Build an error as reported by a driver implementation.
    pub fn driver(class: DbApiClass, message: impl Into<String>) -> Self {
        Error::Driver {
            class,
            message: message.into(),
        }
    }

    pub(crate) fn parse(what: &str, value: &str) -> Self {
        Error::Parse(format!("invalid {} value: {:?}", what, value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
