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

//! Streaming record-at-a-time unmarshaling (§4.10): detect whole-stream gzip
//! framing, then read version line, headers, and a `Content-Length`-bounded
//! block per record.
//!
//! Grounded on the teacher's `WarcFile::records()` in `crates/warc/src/lib.rs`,
//! which wraps the *entire* byte source once in a single
//! `BufReader<MultiGzDecoder<R>>` rather than re-opening a decoder at every
//! gzip-member boundary — `MultiGzDecoder` already concatenates consecutive
//! members into one continuous decompressed stream, so the rest of the
//! parser reads a plain (logically uncompressed) sequence of records either
//! way.

use std::io::{BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;

use crate::block::{dispatch_block, Block, GenericBlock};
use crate::digest::{Algorithm, Encoding};
use crate::error::{Error, Policy, Result, ValidationCollector};
use crate::field_def::validate_header;
use crate::fields_parser::parse_fields;
use crate::io::{CountingReader, LimitedReader, SpillBuffer};
use crate::options::UnmarshalOptions;
use crate::record::Record;
use crate::record_type::Version;

enum Source<R> {
    Plain(CountingReader<BufReader<R>>),
    Gz(BufReader<MultiGzDecoder<CountingReader<BufReader<R>>>>),
}

impl<R: Read> Read for Source<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Source::Plain(r) => r.read(buf),
            Source::Gz(r) => r.read(buf),
        }
    }
}

impl<R: Read> BufRead for Source<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        match self {
            Source::Plain(r) => r.fill_buf(),
            Source::Gz(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Source::Plain(r) => r.consume(amt),
            Source::Gz(r) => r.consume(amt),
        }
    }
}

/// Reads [`Record`]s one at a time from a byte stream. Construction peeks the
/// first two bytes for the gzip magic number (`1F 8B`) and wires up the
/// matching [`Source`] variant once; every subsequent call to
/// [`Unmarshaler::next_record`] reads through the same decoder.
pub struct Unmarshaler<R: Read> {
    source: Source<R>,
    options: UnmarshalOptions,
    done: bool,
}

impl<R: Read> Unmarshaler<R> {
    pub fn new(reader: R, options: UnmarshalOptions) -> Result<Self> {
        let mut peek = BufReader::new(reader);
        let is_gzip = {
            let buf = peek.fill_buf()?;
            buf.len() >= 2 && buf[0] == 0x1f && buf[1] == 0x8b
        };
        let source = if is_gzip {
            Source::Gz(BufReader::new(MultiGzDecoder::new(CountingReader::new(peek))))
        } else {
            Source::Plain(CountingReader::new(peek))
        };
        Ok(Self { source, options, done: false })
    }

    /// Bytes consumed from the underlying reader so far. Exact for an
    /// uncompressed stream (tracked at the `BufRead::consume` boundary, i.e.
    /// the bytes the parser has actually used); for a gzipped stream this
    /// tracks compressed bytes pulled to satisfy the decoder's own read-ahead
    /// and is therefore only a best-effort position, not a precise
    /// gzip-member boundary.
    pub fn offset(&self) -> u64 {
        match &self.source {
            Source::Plain(c) => c.count(),
            Source::Gz(g) => g.get_ref().get_ref().count(),
        }
    }

    /// Read the next record, or `None` at a clean end of stream.
    pub fn next_record(&mut self) -> Result<Option<(Record, ValidationCollector)>> {
        if self.done {
            return Ok(None);
        }
        let mut validation = ValidationCollector::new();
        let syntax_policy = self.options.validation.syntax_error_policy;

        let version_line = match self.next_version_line(&mut validation)? {
            Some(l) => l,
            None => {
                self.done = true;
                return Ok(None);
            }
        };
        let version = parse_version(&version_line, self.options.validation.version, syntax_policy, &mut validation)?;

        let header = parse_fields(&mut self.source, syntax_policy, &mut validation)?;
        let record_type = validate_header(
            &header,
            version,
            self.options.validation.spec_violation_policy,
            self.options.validation.unknown_record_type_policy,
            &mut validation,
        )?;

        let content_length = header.get_int("Content-Length").filter(|n| *n >= 0).unwrap_or(0) as u64;

        let alg = self.options.validation.default_digest_algorithm;
        let encoding = self.options.validation.default_digest_encoding;

        let mut body = SpillBuffer::new(
            self.options.validation.buffer_tmp_dir.clone(),
            self.options.validation.buffer_max_mem_bytes,
        );
        {
            let mut limited = LimitedReader::new(&mut self.source, content_length);
            body.read_from(&mut limited)?;
        }
        body.rewind()?;

        let block = if self.options.validation.skip_parse_block {
            Block::Generic(GenericBlock::from_cached(body, content_length, alg, encoding))
        } else {
            dispatch_block(
                &record_type,
                &header,
                body,
                content_length,
                alg,
                encoding,
                syntax_policy,
                self.options.validation.fix_warc_fields_block_errors,
                &mut validation,
            )?
        };

        consume_block_terminator(&mut self.source, syntax_policy, &mut validation)?;

        let mut record = Record::new(version, record_type, header, block);
        record.validate_digest(
            self.options.validation.spec_violation_policy,
            self.options.validation.add_missing_digest,
            self.options.validation.fix_digest,
            true,
            self.options.validation.fix_content_length,
            encoding,
            &mut validation,
        )?;

        Ok(Some((record, validation)))
    }

    /// Recover the start of the next record per §4.10 step 1: scan byte at a
    /// time for the literal `WARC/`, discarding any other leading byte one at
    /// a time (not whole lines), so junk glued directly onto the version line
    /// with no intervening CRLF — a single corrupt byte, a stray BOM — is
    /// skipped without losing the record behind it. Under `syntax=fail` the
    /// first byte that can't be part of `WARC/` is an error immediately;
    /// under `warn`/`ignore` scanning continues and the total skip count is
    /// reported once, against the version line it finds. Returns `None` only
    /// at a clean end of stream.
    fn next_version_line(&mut self, validation: &mut ValidationCollector) -> Result<Option<String>> {
        const MAGIC: &[u8; 5] = b"WARC/";
        let policy = self.options.validation.syntax_error_policy;
        let mut match_len = 0usize;
        let mut skipped: u64 = 0;
        let mut one = [0u8; 1];

        loop {
            let n = self.source.read(&mut one)?;
            if n == 0 {
                let total = skipped + match_len as u64;
                if total > 0 {
                    policy.apply(validation, || Error::SyntaxError {
                        line: 0,
                        message: format!("stream ended after skipping {total} bytes without finding a WARC version line"),
                        cause: None,
                    })?;
                }
                return Ok(None);
            }

            let byte = one[0];
            if byte.to_ascii_uppercase() == MAGIC[match_len].to_ascii_uppercase() {
                match_len += 1;
                if match_len == MAGIC.len() {
                    let rest = read_line_raw(&mut self.source)?.unwrap_or_default();
                    if skipped > 0 {
                        policy.apply(validation, || Error::SyntaxError {
                            line: 0,
                            message: format!("record was found {skipped} bytes after expected offset"),
                            cause: None,
                        })?;
                    }
                    return Ok(Some(format!("WARC/{rest}")));
                }
                continue;
            }

            // `byte` breaks the in-progress match (if any). Everything
            // matched so far, plus this byte, is leading junk discarded one
            // byte at a time.
            if policy == Policy::Fail {
                return Err(Error::SyntaxError {
                    line: 0,
                    message: "expected a WARC version line, found an unexpected byte first".to_string(),
                    cause: None,
                });
            }
            skipped += match_len as u64 + 1;
            match_len = usize::from(byte.to_ascii_uppercase() == MAGIC[0].to_ascii_uppercase());
        }
    }
}

fn parse_version(line: &str, fallback: Version, policy: Policy, validation: &mut ValidationCollector) -> Result<Version> {
    match line.to_ascii_uppercase().as_str() {
        "WARC/1.0" => Ok(Version::V1_0),
        "WARC/1.1" => Ok(Version::V1_1),
        _ => {
            policy.apply(validation, || Error::SyntaxError {
                line: 0,
                message: format!("unrecognized WARC version line '{line}'"),
                cause: None,
            })?;
            Ok(fallback)
        }
    }
}

/// A record's block content is followed by `CRLF CRLF` (the end-of-block
/// marker plus the blank line that would precede a continuation line on a
/// fields block). Consume both, reporting anything other than a blank line.
fn consume_block_terminator<R: Read>(source: &mut Source<R>, policy: Policy, validation: &mut ValidationCollector) -> Result<()> {
    for _ in 0..2 {
        match read_line_raw(source)? {
            Some(line) if line.is_empty() => {}
            Some(other) => {
                policy.apply(validation, || Error::SyntaxError {
                    line: 0,
                    message: format!("expected a blank line after block content, found '{other}'"),
                    cause: None,
                })?;
            }
            None => {
                policy.apply(validation, || Error::SyntaxError {
                    line: 0,
                    message: "stream ended before the block's trailing CRLF CRLF".to_string(),
                    cause: None,
                })?;
                break;
            }
        }
    }
    Ok(())
}

fn read_line_raw<R: Read>(source: &mut Source<R>) -> Result<Option<String>> {
    let mut raw = Vec::new();
    let n = source.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Ok(None);
    }
    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn plain_record(body: &str) -> String {
        format!(
            "WARC/1.1\r\n\
WARC-Type: resource\r\n\
WARC-Record-ID: <urn:uuid:e9a0cecc-0221-11e7-adb1-0242ac120008>\r\n\
WARC-Date: 2017-03-06T04:03:53Z\r\n\
WARC-Target-URI: http://example.com/\r\n\
Content-Type: text/plain\r\n\
Content-Length: {}\r\n\
\r\n\
{body}\r\n\
\r\n",
            body.len()
        )
    }

    #[test]
    fn reads_a_single_plain_record() {
        let data = plain_record("hello world");
        let mut u = Unmarshaler::new(Cursor::new(data), UnmarshalOptions::default()).unwrap();
        let (mut record, validation) = u.next_record().unwrap().unwrap();
        assert!(validation.valid(), "{validation}");
        assert_eq!(record.header().get("WARC-Target-URI"), Some("http://example.com/"));
        let mut out = Vec::new();
        record.block().raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
        assert!(u.next_record().unwrap().is_none());
    }

    #[test]
    fn reads_two_consecutive_records() {
        let data = format!("{}{}", plain_record("first"), plain_record("second"));
        let mut u = Unmarshaler::new(Cursor::new(data), UnmarshalOptions::default()).unwrap();
        let (_, v1) = u.next_record().unwrap().unwrap();
        assert!(v1.valid());
        let (mut second, v2) = u.next_record().unwrap().unwrap();
        assert!(v2.valid());
        let mut out = Vec::new();
        second.block().raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"second");
        assert!(u.next_record().unwrap().is_none());
    }

    #[test]
    fn reads_gzip_compressed_record() {
        use std::io::Write;
        let raw = plain_record("gzipped body");
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(raw.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut u = Unmarshaler::new(Cursor::new(compressed), UnmarshalOptions::default()).unwrap();
        let (mut record, validation) = u.next_record().unwrap().unwrap();
        assert!(validation.valid(), "{validation}");
        let mut out = Vec::new();
        record.block().raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"gzipped body");
    }

    #[test]
    fn concatenated_gzip_members_read_as_consecutive_records() {
        use std::io::Write;
        let mut compressed = Vec::new();
        for body in ["one", "two"] {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(plain_record(body).as_bytes()).unwrap();
            compressed.extend(encoder.finish().unwrap());
        }

        let mut u = Unmarshaler::new(Cursor::new(compressed), UnmarshalOptions::default()).unwrap();
        let (mut r1, _) = u.next_record().unwrap().unwrap();
        let mut out1 = Vec::new();
        r1.block().raw_bytes().unwrap().read_to_end(&mut out1).unwrap();
        assert_eq!(out1, b"one");

        let (mut r2, _) = u.next_record().unwrap().unwrap();
        let mut out2 = Vec::new();
        r2.block().raw_bytes().unwrap().read_to_end(&mut out2).unwrap();
        assert_eq!(out2, b"two");
    }

    #[tracing_test::traced_test]
    #[test]
    fn junk_before_version_line_is_reported_under_warn() {
        let data = format!("garbage line\r\n{}", plain_record("hi"));
        let mut u = Unmarshaler::new(Cursor::new(data), UnmarshalOptions::default()).unwrap();
        let (_, validation) = u.next_record().unwrap().unwrap();
        assert!(!validation.valid());
        assert!(logs_contain("validation problem"));
    }

    #[test]
    fn junk_before_version_line_fails_under_strict() {
        let data = format!("garbage line\r\n{}", plain_record("hi"));
        let mut u = Unmarshaler::new(Cursor::new(data), UnmarshalOptions::strict_validation()).unwrap();
        assert!(u.next_record().is_err());
    }

    #[test]
    fn junk_glued_directly_onto_the_version_line_is_recovered() {
        let data = format!("\x00{}", plain_record("hi"));
        let mut u = Unmarshaler::new(Cursor::new(data), UnmarshalOptions::default()).unwrap();
        let (mut record, validation) = u.next_record().unwrap().unwrap();
        assert!(!validation.valid());
        assert!(format!("{validation}").contains("record was found 1 bytes after expected offset"));
        let mut out = Vec::new();
        record.block().raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hi");
    }

    #[test]
    fn byte_order_mark_before_the_version_line_is_recovered() {
        let data = format!("\u{feff}{}", plain_record("hi"));
        let mut u = Unmarshaler::new(Cursor::new(data), UnmarshalOptions::default()).unwrap();
        let (_, validation) = u.next_record().unwrap().unwrap();
        assert!(!validation.valid());
        assert!(format!("{validation}").contains("record was found 3 bytes after expected offset"));
    }

    #[test]
    fn missing_declared_header_field_is_a_no_op_under_no_validation() {
        let data = plain_record("hi");
        let mut u = Unmarshaler::new(Cursor::new(data), UnmarshalOptions::no_validation()).unwrap();
        let (mut record, validation) = u.next_record().unwrap().unwrap();
        assert!(validation.valid());
        match record.block() {
            Block::Generic(_) => {}
            _ => panic!("no_validation should always produce a generic block"),
        }
    }

    #[test]
    fn offset_advances_across_records() {
        let data = format!("{}{}", plain_record("first"), plain_record("second"));
        let mut u = Unmarshaler::new(Cursor::new(data), UnmarshalOptions::default()).unwrap();
        assert_eq!(u.offset(), 0);
        u.next_record().unwrap();
        let after_first = u.offset();
        assert!(after_first > 0);
        u.next_record().unwrap();
        assert!(u.offset() > after_first);
    }
}
