//! Decoding of integer and string literal tokens.
//!
//! Both decoders work on the raw token text and return the message to report
//! at that token on failure.

use std::borrow::Cow;

/// Parses an integer literal.
///
/// `0x` and `0b` prefixes select hex and binary, any other leading `0` selects
/// octal, and everything else is decimal. Values above `i64::MAX` are rejected.
pub(super) fn parse_integer(text: &str) -> Result<i64, Cow<'static, str>> {
    let (base, digits): (u32, &str) = match text.as_bytes() {
        [b'0', b'x' | b'X', ..] => (16, &text[2..]),
        [b'0', b'b' | b'B', ..] => (2, &text[2..]),
        [b'0', _, ..] => (8, &text[1..]),
        _ => (10, text),
    };
    if digits.is_empty() {
        return Err(Cow::Borrowed("Invalid number"));
    }

    let mut value: u64 = 0;
    for c in digits.chars() {
        let Some(digit) = c.to_digit(16) else {
            return Err(Cow::Borrowed("Invalid number"));
        };
        if digit >= base {
            return Err(Cow::Owned(format!("Invalid digit {digit} for base {base} integer")));
        }
        value = value
            .checked_mul(u64::from(base))
            .and_then(|v| v.checked_add(u64::from(digit)))
            .ok_or(Cow::Borrowed("Integer too large"))?;
    }
    i64::try_from(value).map_err(|_| Cow::Borrowed("Integer too large"))
}

/// Decodes one quoted string literal token, appending its bytes to `out`.
///
/// A backslash followed by a newline continues the literal on the next line
/// and contributes nothing.
pub(super) fn decode_string(token_text: &str, out: &mut String) -> Result<(), Cow<'static, str>> {
    let body = token_text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token_text);

    let mut chars = body.char_indices();
    while let Some((_, c)) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some((index, escape)) = chars.next() else {
            return Err(Cow::Borrowed("Invalid escape sequence"));
        };
        match escape {
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0C'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0B'),
            '\n' => {}
            'x' | 'u' | 'U' => {
                let (len, kind) = match escape {
                    'x' => (2, "byte"),
                    'u' => (4, "Unicode"),
                    _ => (8, "Unicode"),
                };
                let start = index + 1;
                let hex = body
                    .get(start..start + len)
                    .ok_or_else(|| Cow::Owned(format!("Incomplete {kind} escape sequence")))?;
                let value = u32::from_str_radix(hex, 16)
                    .ok()
                    .filter(|_| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                    .ok_or_else(|| Cow::Owned(format!("Invalid {kind} escape sequence")))?;
                let decoded = char::from_u32(value).ok_or_else(|| Cow::Owned(format!("Invalid {kind} escape sequence")))?;
                out.push(decoded);
                for _ in 0..len {
                    chars.next();
                }
            }
            _ => return Err(Cow::Borrowed("Invalid escape sequence")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Result<String, Cow<'static, str>> {
        let mut out = String::new();
        decode_string(text, &mut out).map(|()| out)
    }

    #[test]
    fn integer_bases() {
        assert_eq!(parse_integer("42"), Ok(42));
        assert_eq!(parse_integer("0"), Ok(0));
        assert_eq!(parse_integer("017"), Ok(15));
        assert_eq!(parse_integer("0x1F"), Ok(31));
        assert_eq!(parse_integer("0b101"), Ok(5));
        assert_eq!(parse_integer("9223372036854775807"), Ok(i64::MAX));
    }

    #[test]
    fn integer_errors() {
        assert_eq!(parse_integer("09").unwrap_err(), "Invalid digit 9 for base 8 integer");
        assert_eq!(parse_integer("9223372036854775808").unwrap_err(), "Integer too large");
        assert_eq!(parse_integer("99999999999999999999999").unwrap_err(), "Integer too large");
    }

    #[test]
    fn simple_escapes() {
        assert_eq!(decode(r#""a\tb\n""#).unwrap(), "a\tb\n");
        assert_eq!(decode(r#""\"\\\0""#).unwrap(), "\"\\\0");
        assert_eq!(decode("\"line\\\nnext\"").unwrap(), "linenext");
    }

    #[test]
    fn hex_and_unicode_escapes() {
        assert_eq!(decode(r#""\x41""#).unwrap(), "A");
        assert_eq!(decode(r#""\u00e9""#).unwrap(), "\u{e9}");
        assert_eq!(decode(r#""\U0001F600""#).unwrap(), "\u{1F600}");
    }

    #[test]
    fn escape_errors() {
        assert_eq!(decode(r#""\x4""#).unwrap_err(), "Incomplete byte escape sequence");
        assert_eq!(decode(r#""\u00zz""#).unwrap_err(), "Invalid Unicode escape sequence");
        assert_eq!(decode(r#""\q""#).unwrap_err(), "Invalid escape sequence");
    }
}
