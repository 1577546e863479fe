//! PostgreSQL types and the typecast registry.
//!
//! Column values arrive from the driver in text wire format. The
//! [`TypeRegistry`] maps a column's type identifier to a decoder producing a
//! host [`Value`]; [`Value::to_wire_text`] goes the other way.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::encoder::ClientEncoding;
use super::escape::escape_bytea;
use super::interval::Interval;
use super::numeric::Numeric;
use super::typecast;
use crate::error::Result;

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifiers (OIDs).
///
/// These are the built-in type OIDs from PostgreSQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    // Boolean types
    pub const BOOL: Oid = Oid(16);

    // Binary data
    pub const BYTEA: Oid = Oid(17);

    // Character types
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);

    // Integer types
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);

    // Text types
    pub const TEXT: Oid = Oid(25);

    // Row identifiers
    pub const OID_TYPE: Oid = Oid(26);
    pub const XID: Oid = Oid(28);

    // JSON
    pub const JSON: Oid = Oid(114);
    pub const JSONB: Oid = Oid(3802);

    // Floating point types
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);

    // Legacy time types
    pub const ABSTIME: Oid = Oid(702);
    pub const RELTIME: Oid = Oid(703);
    pub const TINTERVAL: Oid = Oid(704);

    // Money
    pub const MONEY: Oid = Oid(790);

    // String types
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);

    // Date/time types
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const INTERVAL: Oid = Oid(1186);
    pub const TIMETZ: Oid = Oid(1266);

    // Numeric
    pub const NUMERIC: Oid = Oid(1700);

    // UUID
    pub const UUID: Oid = Oid(2950);

    // Array types
    pub const BOOL_ARRAY: Oid = Oid(1000);
    pub const NAME_ARRAY: Oid = Oid(1003);
    pub const INT2_ARRAY: Oid = Oid(1005);
    pub const INT4_ARRAY: Oid = Oid(1007);
    pub const TEXT_ARRAY: Oid = Oid(1009);
    pub const BPCHAR_ARRAY: Oid = Oid(1014);
    pub const VARCHAR_ARRAY: Oid = Oid(1015);
    pub const INT8_ARRAY: Oid = Oid(1016);

    /// Check if this is a text-like type
    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            Oid::TEXT | Oid::VARCHAR | Oid::BPCHAR | Oid::CHAR | Oid::NAME
        )
    }

    /// Canonical type name used as the registry key and DB-API type code.
    ///
    /// Returns `None` for types without a well-known name; those are only
    /// reachable through an explicit [`TypeKey::Oid`] entry.
    pub fn type_name(self) -> Option<&'static str> {
        let name = match self {
            Oid::INT2 | Oid::INT4 => "integer",
            Oid::INT8 => "long",
            Oid::OID_TYPE | Oid::XID => "oid",
            Oid::FLOAT4 | Oid::FLOAT8 => "double",
            Oid::NUMERIC => "numeric",
            Oid::MONEY => "money",
            Oid::BOOL => "bool",
            Oid::BYTEA => "binary",
            _ if self.is_text_like() => "string",
            Oid::DATE => "date",
            Oid::TIMESTAMP | Oid::TIMESTAMPTZ | Oid::ABSTIME => "datetime",
            Oid::TIME | Oid::TIMETZ => "time",
            Oid::INTERVAL => "interval",
            Oid::UUID => "uuid",
            Oid::JSON | Oid::JSONB => "json",
            Oid::BOOL_ARRAY => "bool[]",
            Oid::INT2_ARRAY | Oid::INT4_ARRAY => "integer[]",
            Oid::INT8_ARRAY => "long[]",
            Oid::TEXT_ARRAY | Oid::VARCHAR_ARRAY | Oid::BPCHAR_ARRAY | Oid::NAME_ARRAY => {
                "string[]"
            }
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

// ============================================================================
// Host Values
// ============================================================================

/// A typecast value as handed to (and received from) callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Numeric(Numeric),
    Text(String),
    Bytes(Bytes),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Interval(Interval),
    Uuid(Uuid),
    Array(Vec<Value>),
    /// Undecoded wire data for types without a registered decoder.
    Raw(Bytes),
}

impl Value {
    /// Check if this value is NULL
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// OID of the type this value is sent as.
    pub fn type_oid(&self) -> Oid {
        match self {
            Value::Null => Oid::TEXT, // NULL doesn't have a specific type
            Value::Bool(_) => Oid::BOOL,
            Value::Int(_) => Oid::INT4,
            Value::BigInt(_) => Oid::INT8,
            Value::Float(_) => Oid::FLOAT8,
            Value::Numeric(_) => Oid::NUMERIC,
            Value::Text(_) => Oid::TEXT,
            Value::Bytes(_) => Oid::BYTEA,
            Value::Date(_) => Oid::DATE,
            Value::Time(_) => Oid::TIME,
            Value::Timestamp(_) => Oid::TIMESTAMP,
            Value::Interval(_) => Oid::INTERVAL,
            Value::Uuid(_) => Oid::UUID,
            Value::Array(items) => match items.iter().find(|v| !v.is_null()) {
                Some(Value::Bool(_)) => Oid::BOOL_ARRAY,
                Some(Value::Int(_)) => Oid::INT4_ARRAY,
                Some(Value::BigInt(_)) => Oid::INT8_ARRAY,
                _ => Oid::TEXT_ARRAY,
            },
            Value::Raw(_) => Oid::TEXT,
        }
    }

    /// Render the value in PostgreSQL text input format. `None` for NULL.
    pub fn to_wire_text(&self) -> Option<String> {
        let text = match self {
            Value::Null => return None,
            Value::Bool(v) => (if *v { "t" } else { "f" }).to_string(),
            Value::Int(v) => v.to_string(),
            Value::BigInt(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Numeric(v) => v.to_string(),
            Value::Text(v) => v.clone(),
            Value::Bytes(v) => escape_bytea(v),
            Value::Date(v) => v.format("%Y-%m-%d").to_string(),
            Value::Time(v) => v.format("%H:%M:%S%.6f").to_string(),
            Value::Timestamp(v) => v.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            Value::Interval(v) => v.to_string(),
            Value::Uuid(v) => v.hyphenated().to_string(),
            Value::Array(items) => {
                let elements: Vec<String> = items.iter().map(array_element_text).collect();
                format!("{{{}}}", elements.join(","))
            }
            Value::Raw(v) => String::from_utf8_lossy(v).into_owned(),
        };
        Some(text)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_interval(&self) -> Option<&Interval> {
        match self {
            Value::Interval(iv) => Some(iv),
            _ => None,
        }
    }
}

fn array_element_text(value: &Value) -> String {
    let Some(text) = value.to_wire_text() else {
        return "NULL".to_string();
    };
    let needs_quotes = text.is_empty()
        || text.eq_ignore_ascii_case("null")
        || text
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace());
    if !needs_quotes {
        return text;
    }
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Intervals only ever equal other intervals.
impl PartialEq<Value> for Interval {
    fn eq(&self, other: &Value) -> bool {
        matches!(other, Value::Interval(iv) if iv == self)
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => BigInt,
    f64 => Float,
    Decimal => Numeric,
    Numeric => Numeric,
    String => Text,
    &str => Text,
    Bytes => Bytes,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
    Interval => Interval,
    Uuid => Uuid,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

// ============================================================================
// Typecast Registry
// ============================================================================

/// Identifies a registry entry: a type name or an exact OID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Name(Cow<'static, str>),
    Oid(Oid),
}

impl From<&'static str> for TypeKey {
    fn from(name: &'static str) -> Self {
        TypeKey::Name(Cow::Borrowed(name))
    }
}

impl From<String> for TypeKey {
    fn from(name: String) -> Self {
        TypeKey::Name(Cow::Owned(name))
    }
}

impl From<Oid> for TypeKey {
    fn from(oid: Oid) -> Self {
        TypeKey::Oid(oid)
    }
}

/// Settings a decoder may need besides the raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeContext {
    pub encoding: ClientEncoding,
}

/// A decoder from raw wire text to a host value.
pub type Decoder = Arc<dyn Fn(&[u8], &DecodeContext) -> Result<Value> + Send + Sync>;

/// Connection-scoped table of decoders.
///
/// Callers may replace or remove entries (for example to receive raw bytes
/// instead of decoded strings). Changes must not be made while a fetch on
/// the owning connection is in progress.
#[derive(Clone)]
pub struct TypeRegistry {
    decoders: HashMap<TypeKey, Decoder>,
}

impl TypeRegistry {
    /// A registry with all built-in decoders.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("bool", typecast::decode_bool);
        registry.register("integer", typecast::decode_integer);
        registry.register("long", typecast::decode_long);
        registry.register("oid", typecast::decode_long);
        registry.register("double", typecast::decode_double);
        registry.register("numeric", typecast::decode_numeric);
        registry.register("money", typecast::decode_money);
        registry.register("string", typecast::decode_string);
        registry.register("binary", typecast::decode_binary);
        registry.register("date", typecast::decode_date);
        registry.register("datetime", typecast::decode_datetime);
        registry.register("time", typecast::decode_time);
        registry.register("interval", typecast::decode_interval);
        registry.register("uuid", typecast::decode_uuid);
        registry.register("bool[]", typecast::decode_bool_array);
        registry.register("integer[]", typecast::decode_integer_array);
        registry.register("long[]", typecast::decode_long_array);
        registry.register("string[]", typecast::decode_string_array);
        registry
    }

    /// A registry without any decoders; every value passes through raw.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Install a decoder, returning the one it replaces.
    pub fn register<F>(&mut self, key: impl Into<TypeKey>, decoder: F) -> Option<Decoder>
    where
        F: Fn(&[u8], &DecodeContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.decoders.insert(key.into(), Arc::new(decoder))
    }

    pub fn remove(&mut self, key: impl Into<TypeKey>) -> Option<Decoder> {
        self.decoders.remove(&key.into())
    }

    pub fn contains(&self, key: impl Into<TypeKey>) -> bool {
        self.decoders.contains_key(&key.into())
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    fn lookup(&self, oid: Oid) -> Option<&Decoder> {
        self.decoders.get(&TypeKey::Oid(oid)).or_else(|| {
            oid.type_name()
                .and_then(|name| self.decoders.get(&TypeKey::Name(Cow::Borrowed(name))))
        })
    }

    /// Decode one column value.
    ///
    /// NULL stays NULL whatever the type; types without a decoder come back
    /// as [`Value::Raw`].
    pub fn decode(&self, oid: Oid, raw: Option<&[u8]>, ctx: &DecodeContext) -> Result<Value> {
        let Some(raw) = raw else {
            return Ok(Value::Null);
        };
        match self.lookup(oid) {
            Some(decoder) => decoder(raw, ctx),
            None => Ok(Value::Raw(Bytes::copy_from_slice(raw))),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}
