//! Built-in decoders from PostgreSQL text output to host values.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::escape::unescape_bytea;
use super::interval::Interval;
use super::numeric::Numeric;
use super::types::{DecodeContext, Value};
use crate::error::{Error, Result};

fn ascii<'a>(raw: &'a [u8], what: &str) -> Result<&'a str> {
    std::str::from_utf8(raw)
        .map_err(|_| Error::Parse(format!("{} value is not valid text", what)))
}

// ============================================================================
// Scalars
// ============================================================================

pub fn decode_bool(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    match raw {
        b"t" | b"T" | b"true" | b"1" => Ok(Value::Bool(true)),
        b"f" | b"F" | b"false" | b"0" => Ok(Value::Bool(false)),
        _ => Err(Error::parse("bool", &String::from_utf8_lossy(raw))),
    }
}

pub fn decode_integer(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    let text = ascii(raw, "integer")?;
    text.parse::<i32>()
        .map(Value::Int)
        .map_err(|_| Error::parse("integer", text))
}

pub fn decode_long(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    let text = ascii(raw, "bigint")?;
    text.parse::<i64>()
        .map(Value::BigInt)
        .map_err(|_| Error::parse("bigint", text))
}

pub fn decode_double(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    let text = ascii(raw, "double")?;
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| Error::parse("double", text))
}

/// NUMERIC keeps its exact decimal digits, including `NaN`.
pub fn decode_numeric(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    ascii(raw, "numeric")?.parse::<Numeric>().map(Value::Numeric)
}

/// MONEY output such as `$1,234.56`, `-$1.00` or `($1.00)`.
pub fn decode_money(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    let text = ascii(raw, "money")?;
    let negative = text.contains('-') || text.contains('(');
    let digits: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' ' | '(' | ')' | '-'))
        .collect();
    let amount = Decimal::from_str(&digits).map_err(|_| Error::parse("money", text))?;
    let amount = if negative { -amount } else { amount };
    Ok(Value::Numeric(amount.into()))
}

pub fn decode_string(raw: &[u8], ctx: &DecodeContext) -> Result<Value> {
    ctx.encoding.decode(raw).map(Value::Text)
}

pub fn decode_binary(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    unescape_bytea(raw).map(Value::Bytes)
}

pub fn decode_uuid(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    let text = ascii(raw, "uuid")?;
    Uuid::parse_str(text)
        .map(Value::Uuid)
        .map_err(|_| Error::parse("uuid", text))
}

// ============================================================================
// Dates and Times
// ============================================================================

pub fn decode_date(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    parse_date(ascii(raw, "date")?).map(Value::Date)
}

pub fn decode_time(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    parse_time(ascii(raw, "time")?).map(Value::Time)
}

pub fn decode_datetime(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    let text = ascii(raw, "timestamp")?;
    let (date, time) = text
        .split_once(' ')
        .ok_or_else(|| Error::parse("timestamp", text))?;
    let date = parse_date(date)?;
    let time = parse_time(time)?;
    Ok(Value::Timestamp(NaiveDateTime::new(date, time)))
}

/// Strict `YYYY-MM-DD`.
fn parse_date(text: &str) -> Result<NaiveDate> {
    let well_formed = text.len() == 10
        && text
            .bytes()
            .enumerate()
            .all(|(i, b)| if i == 4 || i == 7 { b == b'-' } else { b.is_ascii_digit() });
    if !well_formed {
        return Err(Error::parse("date", text));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| Error::parse("date", text))
}

/// `HH:MM:SS[.ffffff][+00]`. Any offset other than UTC is refused.
fn parse_time(text: &str) -> Result<NaiveTime> {
    let clock = strip_utc_offset(text)?;
    let (hours, minutes, seconds, micros) = parse_clock(clock, "time")?;
    u32::try_from(hours)
        .ok()
        .zip(u32::try_from(minutes).ok())
        .zip(u32::try_from(seconds).ok())
        .and_then(|((h, m), s)| NaiveTime::from_hms_micro_opt(h, m, s, micros))
        .ok_or_else(|| Error::parse("time", text))
}

fn strip_utc_offset(text: &str) -> Result<&str> {
    match text.find(['+', '-']) {
        None => Ok(text),
        Some(pos) if &text[pos..] == "+00" => Ok(&text[..pos]),
        Some(pos) => Err(Error::Unsupported(format!(
            "unsupported timezone offset {:?}; only +00 can be represented",
            &text[pos..]
        ))),
    }
}

/// Split `H:MM:SS[.f]` into its parts. Hours may exceed 23 (interval output).
fn parse_clock(text: &str, what: &str) -> Result<(i64, i64, i64, u32)> {
    let bad = || Error::parse(what, text);

    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text, None),
    };

    let mut parts = whole.split(':');
    let mut field = || -> Result<i64> {
        let part = parts.next().ok_or_else(bad)?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        part.parse::<i64>().map_err(|_| bad())
    };
    let hours = field()?;
    let minutes = field()?;
    let seconds = field()?;
    if parts.next().is_some() || minutes > 59 || seconds > 60 {
        return Err(bad());
    }

    let micros = match fraction {
        None => 0,
        Some(digits) => {
            if digits.is_empty() || digits.len() > 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            // ".67" is 670000 microseconds, not 67.
            let padded = format!("{:0<6}", digits);
            padded.parse::<u32>().map_err(|_| bad())?
        }
    };

    Ok((hours, minutes, seconds, micros))
}

// ============================================================================
// Intervals
// ============================================================================

/// Decode interval output such as `1 year 2 mons -3 days 04:05:06.5`.
pub fn decode_interval(raw: &[u8], _: &DecodeContext) -> Result<Value> {
    parse_interval(ascii(raw, "interval")?).map(Value::Interval)
}

pub fn parse_interval(text: &str) -> Result<Interval> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(Error::parse("interval", text));
    }

    let mut interval = Interval::default();
    let mut rest = &tokens[..];
    while rest.len() >= 2 {
        let amount = rest[0]
            .parse::<i64>()
            .map_err(|_| Error::parse("interval", text))?;
        add_unit(&mut interval, rest[1], amount).ok_or_else(|| overflow(text))?;
        rest = &rest[2..];
    }

    if let [clock] = rest {
        let (negative, clock) = match clock.strip_prefix('-') {
            Some(unsigned) => (true, unsigned),
            None => (false, clock.strip_prefix('+').unwrap_or(clock)),
        };
        let (hours, minutes, seconds, micros) = parse_clock(clock, "interval")?;
        let sign: i64 = if negative { -1 } else { 1 };
        for (slot, amount) in [
            (&mut interval.hours, hours),
            (&mut interval.minutes, minutes),
            (&mut interval.seconds, seconds),
            (&mut interval.microseconds, i64::from(micros)),
        ] {
            *slot = sign
                .checked_mul(amount)
                .and_then(|signed| slot.checked_add(signed))
                .ok_or_else(|| overflow(text))?;
        }
    }

    Ok(interval)
}

fn overflow(text: &str) -> Error {
    Error::Parse(format!("interval value out of range: {:?}", text))
}

/// Accumulate `amount` into the field named by `unit`; `None` on overflow.
fn add_unit(interval: &mut Interval, unit: &str, amount: i64) -> Option<()> {
    let lowered = unit.to_ascii_lowercase();
    let singular = lowered.strip_suffix('s').unwrap_or(&lowered);
    let slot = match singular {
        "year" | "yr" => &mut interval.years,
        "mon" | "month" => &mut interval.months,
        "day" => &mut interval.days,
        "hour" | "hr" => &mut interval.hours,
        "min" | "minute" => &mut interval.minutes,
        "sec" | "second" => &mut interval.seconds,
        "microsecond" | "usec" => &mut interval.microseconds,
        _ => {
            // Unknown units are preserved under their literal name.
            interval.extra.entry(unit.to_string()).or_insert(0)
        }
    };
    *slot = slot.checked_add(amount)?;
    Some(())
}

// ============================================================================
// Arrays
// ============================================================================

fn array_body<'a>(text: &'a str, what: &str) -> Result<&'a str> {
    text.strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| Error::parse(what, text))
}

fn decode_simple_array<F>(raw: &[u8], what: &str, element: F) -> Result<Value>
where
    F: Fn(&str) -> Result<Value>,
{
    let text = ascii(raw, what)?;
    let body = array_body(text, what)?;
    if body.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    body.split(',')
        .map(|item| {
            if item.eq_ignore_ascii_case("NULL") {
                Ok(Value::Null)
            } else {
                element(item)
            }
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

pub fn decode_bool_array(raw: &[u8], ctx: &DecodeContext) -> Result<Value> {
    decode_simple_array(raw, "bool[]", |item| decode_bool(item.as_bytes(), ctx))
}

pub fn decode_integer_array(raw: &[u8], ctx: &DecodeContext) -> Result<Value> {
    decode_simple_array(raw, "integer[]", |item| decode_integer(item.as_bytes(), ctx))
}

pub fn decode_long_array(raw: &[u8], ctx: &DecodeContext) -> Result<Value> {
    decode_simple_array(raw, "bigint[]", |item| decode_long(item.as_bytes(), ctx))
}

/// String arrays need a real scan: elements may be double-quoted and contain
/// commas, quotes (backslash-escaped) or backslashes.
pub fn decode_string_array(raw: &[u8], ctx: &DecodeContext) -> Result<Value> {
    let text = ctx.encoding.decode(raw)?;
    let body = array_body(&text, "string[]")?;
    split_array_row(body)
        .map(|items| {
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, Value::Text))
                .collect()
        })
        .map(Value::Array)
        .ok_or_else(|| Error::parse("string[]", &text))
}

/// One-row CSV-style split with backslash escaping and no quote doubling.
/// Unquoted `NULL` yields `None`.
fn split_array_row(body: &str) -> Option<Vec<Option<String>>> {
    let mut items = Vec::new();
    if body.is_empty() {
        return Some(items);
    }

    let mut chars = body.chars().peekable();
    loop {
        let mut item = String::new();
        let mut quoted = false;

        if chars.peek() == Some(&'"') {
            quoted = true;
            chars.next();
            loop {
                match chars.next()? {
                    '\\' => item.push(chars.next()?),
                    '"' => break,
                    c => item.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                chars.next();
                if c == '\\' {
                    item.push(chars.next()?);
                } else {
                    item.push(c);
                }
            }
        }

        if !quoted && item.eq_ignore_ascii_case("NULL") {
            items.push(None);
        } else {
            items.push(Some(item));
        }

        match chars.next() {
            None => return Some(items),
            Some(',') => continue,
            Some(_) => return None,
        }
    }
}
