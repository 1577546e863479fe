//! Parameter encoding.
//!
//! Host values are turned into [`WireParam`]s before they reach the driver.
//! Text is converted to bytes in the connection's client encoding; binary
//! values and already-encoded bytes pass through untouched, so encoding is
//! idempotent.

use std::fmt;

use bytes::Bytes;

use super::types::Value;
use crate::error::{Error, Result};

// ============================================================================
// Client Encoding
// ============================================================================

/// Character encoding used for SQL text, text parameters and text results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientEncoding {
    #[default]
    Utf8,
    Latin1,
    SqlAscii,
}

impl ClientEncoding {
    /// Resolve a host-style encoding label (`utf-8`, `latin-1`, `LATIN1`, ...).
    pub fn from_label(label: &str) -> Result<Self> {
        let normalized: String = label
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "utf8" | "unicode" => Ok(ClientEncoding::Utf8),
            "latin1" | "iso88591" | "l1" => Ok(ClientEncoding::Latin1),
            "sqlascii" | "ascii" | "usascii" => Ok(ClientEncoding::SqlAscii),
            _ => Err(Error::Config(format!("unsupported client encoding: {}", label))),
        }
    }

    /// Name of the encoding as the server spells it.
    pub fn pg_name(self) -> &'static str {
        match self {
            ClientEncoding::Utf8 => "UTF8",
            ClientEncoding::Latin1 => "LATIN1",
            ClientEncoding::SqlAscii => "SQL_ASCII",
        }
    }

    pub fn encode(self, text: &str) -> Result<Bytes> {
        match self {
            ClientEncoding::Utf8 => Ok(Bytes::copy_from_slice(text.as_bytes())),
            ClientEncoding::Latin1 => self.encode_narrow(text, 0xFF),
            ClientEncoding::SqlAscii => self.encode_narrow(text, 0x7F),
        }
    }

    fn encode_narrow(self, text: &str, max: u32) -> Result<Bytes> {
        text.chars()
            .map(|c| {
                let code = c as u32;
                if code <= max {
                    Ok(code as u8)
                } else {
                    Err(Error::Encoding(format!(
                        "character {:?} cannot be represented in {}",
                        c,
                        self.pg_name()
                    )))
                }
            })
            .collect::<Result<Vec<u8>>>()
            .map(Bytes::from)
    }

    pub fn decode(self, data: &[u8]) -> Result<String> {
        match self {
            ClientEncoding::Utf8 => std::str::from_utf8(data)
                .map(str::to_string)
                .map_err(|e| Error::Encoding(format!("invalid UTF8 data: {}", e))),
            ClientEncoding::Latin1 => Ok(data.iter().map(|b| *b as char).collect()),
            ClientEncoding::SqlAscii => {
                if let Some(b) = data.iter().find(|b| !b.is_ascii()) {
                    return Err(Error::Encoding(format!(
                        "byte 0x{:02x} is not valid in SQL_ASCII",
                        b
                    )));
                }
                Ok(data.iter().map(|b| *b as char).collect())
            }
        }
    }
}

impl fmt::Display for ClientEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pg_name())
    }
}

// ============================================================================
// Wire Parameters
// ============================================================================

/// A parameter value ready to hand to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum WireParam {
    Null,
    /// Text already converted to the client encoding.
    Text(Bytes),
    /// Binary data, sent as bytea.
    Binary(Bytes),
    /// Any other value; the driver chooses its wire format.
    Typed(Value),
}

impl WireParam {
    pub fn is_null(&self) -> bool {
        matches!(self, WireParam::Null)
    }
}

/// Converts host parameter values using the connection's client encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterEncoder {
    encoding: ClientEncoding,
}

impl ParameterEncoder {
    pub fn new(encoding: ClientEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> ClientEncoding {
        self.encoding
    }

    pub fn encode_one(&self, value: &Value) -> Result<WireParam> {
        Ok(match value {
            Value::Null => WireParam::Null,
            Value::Text(s) => WireParam::Text(self.encoding.encode(s)?),
            Value::Bytes(b) => WireParam::Binary(b.clone()),
            other => WireParam::Typed(other.clone()),
        })
    }

    pub fn encode(&self, params: &[Value]) -> Result<Vec<WireParam>> {
        params.iter().map(|p| self.encode_one(p)).collect()
    }

    /// Encode every row of a batch independently.
    pub fn encode_many(&self, rows: &[Vec<Value>]) -> Result<Vec<Vec<WireParam>>> {
        rows.iter().map(|row| self.encode(row)).collect()
    }
}
