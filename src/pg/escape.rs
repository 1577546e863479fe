//! Escaping helpers for literal SQL text and bytea values.

use bytes::Bytes;

use crate::error::{Error, Result};

/// Escape a string for use inside a single-quoted SQL literal.
///
/// Assumes `standard_conforming_strings` is on, so only quotes are doubled.
pub fn escape_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Escape binary data as a bytea literal in hex format.
pub fn escape_bytea(data: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(2 + data.len() * 2);
    out.push_str("\\x");
    for b in data {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decode bytea text output, in either hex (`\x...`) or escape format.
pub fn unescape_bytea(text: &[u8]) -> Result<Bytes> {
    if let Some(hex) = text.strip_prefix(b"\\x") {
        return unescape_hex(hex);
    }

    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i] != b'\\' {
            out.push(text[i]);
            i += 1;
            continue;
        }
        match text.get(i + 1) {
            Some(b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            Some(_) => {
                let octal = text
                    .get(i + 1..i + 4)
                    .filter(|d| d.iter().all(|c| (b'0'..=b'7').contains(c)))
                    .ok_or_else(|| Error::Parse("invalid bytea escape sequence".to_string()))?;
                let value = octal
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + (d - b'0') as u16);
                let byte = u8::try_from(value)
                    .map_err(|_| Error::Parse("bytea octal escape out of range".to_string()))?;
                out.push(byte);
                i += 4;
            }
            None => return Err(Error::Parse("trailing backslash in bytea".to_string())),
        }
    }
    Ok(Bytes::from(out))
}

fn unescape_hex(hex: &[u8]) -> Result<Bytes> {
    fn nibble(c: u8) -> Result<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(Error::Parse(format!("invalid hex digit {:?} in bytea", c as char))),
        }
    }

    if hex.len() % 2 != 0 {
        return Err(Error::Parse("odd number of hex digits in bytea".to_string()));
    }
    hex.chunks_exact(2)
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect::<Result<Vec<u8>>>()
        .map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_string_doubles_quotes() {
        assert_eq!(escape_string("it's"), "it''s");
        assert_eq!(escape_string("plain"), "plain");
    }

    #[test]
    fn test_bytea_hex_roundtrip() {
        let data = [0xf8u8, 0x00, b'a', 0xff];
        let escaped = escape_bytea(&data);
        assert_eq!(escaped, "\\xf80061ff");
        assert_eq!(&unescape_bytea(escaped.as_bytes()).unwrap()[..], &data);
    }

    #[test]
    fn test_unescape_escape_format() {
        assert_eq!(
            &unescape_bytea(b"a\\\\b\\370").unwrap()[..],
            &[b'a', b'\\', b'b', 0xf8]
        );
        assert!(unescape_bytea(b"\\9").is_err());
        assert!(unescape_bytea(b"\\x0").is_err());
    }
}
