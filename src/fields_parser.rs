// Stract is an open source web search engine.
// Copyright (C) 2024 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! A tolerant, line-based parser for the `Name: Value` fields block shared
//! by WARC headers, `application/warc-fields` blocks, and HTTP headers
//! (§4.6). Folds SP/HT-prefixed continuation lines, decodes RFC 2047
//! encoded-words, and reports structural problems through a [`Policy`].

use std::io::BufRead;

use crate::error::{Error, Policy, Result, ValidationCollector};
use crate::fields::WarcFields;

/// Read one physical line (through `LF`), stripping the trailing `CR LF` or
/// bare `LF`. Returns `None` at end of stream. `line_no` is bumped for
/// diagnostics.
fn read_physical_line(
    reader: &mut impl BufRead,
    line_no: &mut u64,
    syntax_policy: Policy,
    validation: &mut ValidationCollector,
) -> Result<Option<String>> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Ok(None);
    }
    *line_no += 1;

    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        } else {
            syntax_policy.apply(validation, || Error::SyntaxError {
                line: *line_no,
                message: "line terminator is LF without a preceding CR".to_string(),
                cause: None,
            })?;
        }
    } else {
        syntax_policy.apply(validation, || Error::SyntaxError {
            line: *line_no,
            message: "stream ended mid-line without a terminator".to_string(),
            cause: None,
        })?;
    }

    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

fn is_continuation(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t')
}

/// Decode RFC 2047 `=?charset?{Q,B}?text?=` encoded-words that appear in a
/// header value. Unrecognized or malformed words are left untouched; only
/// UTF-8 charsets are decoded (sufficient for the WARC corpus this parser
/// targets — anything else is passed through verbatim).
fn decode_encoded_words(value: &str, policy: Policy, validation: &mut ValidationCollector, line: u64) -> Result<String> {
    if !value.contains("=?") {
        return Ok(value.to_string());
    }

    let mut out = String::new();
    let mut rest = value;
    while let Some(start) = rest.find("=?") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match decode_one_word(tail) {
            Some((decoded, consumed)) => {
                out.push_str(&decoded);
                rest = &tail[consumed..];
            }
            None => {
                policy.apply(validation, || Error::SyntaxError {
                    line,
                    message: format!("malformed RFC 2047 encoded-word in '{value}'"),
                    cause: None,
                })?;
                out.push_str("=?");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn decode_one_word(s: &str) -> Option<(String, usize)> {
    // s starts with "=?"
    let mut parts = s[2..].splitn(4, '?');
    let charset = parts.next()?;
    let enc = parts.next()?;
    let text = parts.next()?;
    let remainder_marker = "?=";
    let end_idx = text.find(remainder_marker)?;
    let text = &text[..end_idx];

    let consumed = 2 + charset.len() + 1 + enc.len() + 1 + text.len() + remainder_marker.len();

    let decoded_bytes = match enc.to_ascii_uppercase().as_str() {
        "B" => data_encoding::BASE64.decode(text.as_bytes()).ok()?,
        "Q" => decode_q_encoding(text),
        _ => return None,
    };

    let decoded = if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("us-ascii") {
        String::from_utf8(decoded_bytes).ok()?
    } else {
        // Unknown charset: best effort, lossy.
        String::from_utf8_lossy(&decoded_bytes).into_owned()
    };

    Some((decoded, consumed))
}

fn decode_q_encoding(text: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&text[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Parse a fields block up to (and consuming) the blank-line end-of-fields
/// marker. End of stream without that marker is a syntax error.
pub fn parse_fields(
    reader: &mut impl BufRead,
    syntax_policy: Policy,
    validation: &mut ValidationCollector,
) -> Result<WarcFields> {
    let mut fields = WarcFields::new();
    let mut line_no = 0u64;
    let mut pending: Option<(String, String)> = None;

    loop {
        let line = read_physical_line(reader, &mut line_no, syntax_policy, validation)?;
        let line = match line {
            Some(l) => l,
            None => {
                syntax_policy.apply(validation, || Error::SyntaxError {
                    line: line_no,
                    message: "stream ended without an end-of-fields marker".to_string(),
                    cause: None,
                })?;
                break;
            }
        };

        if line.is_empty() {
            // Blank line always terminates, even if the next line would
            // otherwise look like a continuation.
            break;
        }

        if is_continuation(&line) {
            match &mut pending {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim_start_matches([' ', '\t']));
                }
                None => {
                    syntax_policy.apply(validation, || Error::SyntaxError {
                        line: line_no,
                        message: "continuation line with no preceding field".to_string(),
                        cause: None,
                    })?;
                }
            }
            continue;
        }

        if let Some((name, value)) = pending.take() {
            let decoded = decode_encoded_words(&value, syntax_policy, validation, line_no)?;
            fields.add(&name, decoded.trim_matches([' ', '\t', '\r', '\n']));
        }

        match line.split_once(':') {
            Some((name, value)) => {
                let name = name.trim_matches([' ', '\t', '\r', '\n']).to_string();
                let value = value.trim_matches([' ', '\t', '\r', '\n']).to_string();
                pending = Some((name, value));
            }
            None => {
                syntax_policy.apply(validation, || Error::SyntaxError {
                    line: line_no,
                    message: format!("header line '{line}' has no ':' separator"),
                    cause: None,
                })?;
            }
        }
    }

    if let Some((name, value)) = pending.take() {
        let decoded = decode_encoded_words(&value, syntax_policy, validation, line_no)?;
        fields.add(&name, decoded.trim_matches([' ', '\t', '\r', '\n']));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn continuation_folds_with_single_space() {
        // S6
        let data = b"A: first\r\n\tsecond\r\nB: x\r\n\r\n";
        let mut cursor = Cursor::new(&data[..]);
        let mut validation = ValidationCollector::new();
        let fields = parse_fields(&mut cursor, Policy::Warn, &mut validation).unwrap();
        assert_eq!(fields.get("A"), Some("first second"));
        assert_eq!(fields.get("B"), Some("x"));
        assert!(validation.valid());
    }

    #[test]
    fn blank_line_always_terminates() {
        let data = b"A: value\r\n\r\n B: not-a-continuation\r\n\r\n";
        let mut cursor = Cursor::new(&data[..]);
        let mut validation = ValidationCollector::new();
        let fields = parse_fields(&mut cursor, Policy::Warn, &mut validation).unwrap();
        assert_eq!(fields.get("A"), Some("value"));
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn missing_end_marker_is_syntax_error_under_fail() {
        let data = b"A: value\r\n";
        let mut cursor = Cursor::new(&data[..]);
        let mut validation = ValidationCollector::new();
        let res = parse_fields(&mut cursor, Policy::Fail, &mut validation);
        assert!(res.is_err());
    }

    #[test]
    fn missing_end_marker_is_warning_under_warn() {
        let data = b"A: value\r\n";
        let mut cursor = Cursor::new(&data[..]);
        let mut validation = ValidationCollector::new();
        let fields = parse_fields(&mut cursor, Policy::Warn, &mut validation).unwrap();
        assert_eq!(fields.get("A"), Some("value"));
        assert!(!validation.valid());
    }

    #[test]
    fn decodes_rfc2047_q_encoded_word() {
        let data = b"Subject: =?UTF-8?Q?Hello=5FWorld?=\r\n\r\n";
        let mut cursor = Cursor::new(&data[..]);
        let mut validation = ValidationCollector::new();
        let fields = parse_fields(&mut cursor, Policy::Warn, &mut validation).unwrap();
        assert_eq!(fields.get("Subject"), Some("Hello_World"));
    }

    #[test]
    fn lf_only_line_is_a_warning_under_warn() {
        let data = b"A: value\n\n";
        let mut cursor = Cursor::new(&data[..]);
        let mut validation = ValidationCollector::new();
        let fields = parse_fields(&mut cursor, Policy::Warn, &mut validation).unwrap();
        assert_eq!(fields.get("A"), Some("value"));
        assert!(!validation.valid());
    }
}
