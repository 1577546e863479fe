//! Exact NUMERIC values.
//!
//! PostgreSQL NUMERIC carries up to 131072 digits before the point and 16383
//! after it, plus the special values `NaN` and `±Infinity`. No fixed-width
//! decimal holds that, so [`Numeric`] keeps the server's digits as text and
//! converts on request.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest exponent accepted in `1.5e10` style input.
const MAX_EXPONENT: i64 = 16383;

/// An arbitrary-precision NUMERIC, stored as its canonical decimal text.
///
/// Equality is textual: `1.50` and `1.5` differ, as they do in the column's
/// display scale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Numeric(String);

impl Numeric {
    pub fn nan() -> Self {
        Numeric("NaN".to_string())
    }

    pub fn is_nan(&self) -> bool {
        self.0 == "NaN"
    }

    pub fn is_infinite(&self) -> bool {
        self.0.ends_with("Infinity")
    }

    pub fn is_negative(&self) -> bool {
        self.0.starts_with('-')
    }

    /// The canonical digits, e.g. `-12.340`, `NaN` or `Infinity`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to a fixed-width decimal.
    ///
    /// Fails with a range error for the special values and for anything
    /// with more significant digits than [`Decimal`] can hold.
    pub fn to_decimal(&self) -> Result<Decimal> {
        Decimal::from_str_exact(&self.0)
            .map_err(|_| Error::Range(format!("numeric {} does not fit a decimal", self.0)))
    }

    /// Nearest `f64`; lossy.
    pub fn to_f64(&self) -> f64 {
        self.0.parse().unwrap_or(f64::NAN)
    }
}

impl FromStr for Numeric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        match text.to_ascii_lowercase().as_str() {
            "nan" => return Ok(Numeric::nan()),
            "infinity" | "+infinity" | "inf" | "+inf" => {
                return Ok(Numeric("Infinity".to_string()))
            }
            "-infinity" | "-inf" => return Ok(Numeric("-Infinity".to_string())),
            _ => {}
        }
        canonical(text)
            .map(Numeric)
            .ok_or_else(|| Error::parse("numeric", s))
    }
}

/// Validate `[+-]digits[.digits][e[+-]digits]` and rewrite it without
/// exponent, sign `+` or redundant leading zeros.
fn canonical(text: &str) -> Option<String> {
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => {
            let exponent: i64 = unsigned[at + 1..].parse().ok()?;
            if exponent.abs() > MAX_EXPONENT {
                return None;
            }
            (&unsigned[..at], exponent)
        }
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty())
        || !all_digits(int_part)
        || !all_digits(frac_part)
    {
        return None;
    }

    let (int_digits, frac_digits) = if exponent == 0 {
        (int_part.to_string(), frac_part.to_string())
    } else {
        let digits = format!("{}{}", int_part, frac_part);
        let point = int_part.len() as i64 + exponent;
        if point <= 0 {
            let zeros = "0".repeat(point.unsigned_abs() as usize);
            (String::new(), format!("{}{}", zeros, digits))
        } else if point as usize >= digits.len() {
            let zeros = "0".repeat(point as usize - digits.len());
            (format!("{}{}", digits, zeros), String::new())
        } else {
            let (int, frac) = digits.split_at(point as usize);
            (int.to_string(), frac.to_string())
        }
    };

    let int_digits = int_digits.trim_start_matches('0');
    let mut out = String::with_capacity(int_digits.len() + frac_digits.len() + 3);
    if negative {
        out.push('-');
    }
    out.push_str(if int_digits.is_empty() { "0" } else { int_digits });
    if !frac_digits.is_empty() {
        out.push('.');
        out.push_str(&frac_digits);
    }
    Some(out)
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Decimal> for Numeric {
    fn from(value: Decimal) -> Self {
        Numeric(value.to_string())
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        Numeric(value.to_string())
    }
}

impl TryFrom<String> for Numeric {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Numeric> for String {
    fn from(value: Numeric) -> Self {
        value.0
    }
}
