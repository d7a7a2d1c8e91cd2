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

//! Serializes a [`Record`] back to wire format (§4.10): version line, header
//! fields, the blank line ending the header block, the raw block bytes, and
//! the trailing `CRLF CRLF`.
//!
//! Record segmentation (splitting an oversized block across a `continuation`
//! record) is out of scope (Open Question 1), so a single call always
//! produces one complete, self-contained record — there's no continuation
//! record for the caller to marshal next.

use std::io::{self, Write};

use crate::error::Result;
use crate::record::Record;

/// Write `record` to `sink` in wire format, returning the number of bytes
/// written.
pub fn marshal_record<W: Write>(record: &mut Record, sink: &mut W) -> Result<u64> {
    let mut written = 0u64;

    let version_line = format!("{}\r\n", record.version().as_str());
    sink.write_all(version_line.as_bytes())?;
    written += version_line.len() as u64;

    let mut header_bytes = Vec::new();
    record.header().write(&mut header_bytes)?;
    sink.write_all(&header_bytes)?;
    written += header_bytes.len() as u64;

    sink.write_all(b"\r\n")?;
    written += 2;

    {
        let mut body = record.block().raw_bytes()?;
        written += io::copy(&mut body, sink)?;
    }

    sink.write_all(b"\r\n\r\n")?;
    written += 4;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, GenericBlock};
    use crate::digest::{Algorithm, Encoding};
    use crate::fields::WarcFields;
    use crate::io::SpillBuffer;
    use crate::record_type::{RecordType, Version};

    fn resource_record(body: &[u8]) -> Record {
        let mut header = WarcFields::new();
        header.set_uri_id("WARC-Record-ID", "urn:uuid:e9a0cecc-0221-11e7-adb1-0242ac120008");
        header.set("WARC-Date", "2017-03-06T04:03:53Z");
        header.set("WARC-Type", "resource");
        header.set("Content-Type", "application/octet-stream");
        header.set("Content-Length", &body.len().to_string());

        let mut buf = SpillBuffer::with_defaults();
        buf.write(body).unwrap();
        buf.rewind().unwrap();
        let block = Block::Generic(GenericBlock::from_cached(buf, body.len() as u64, Algorithm::Sha1, Encoding::Base32));
        Record::new(Version::V1_1, RecordType::Resource, header, block)
    }

    #[test]
    fn marshals_version_line_header_and_block() {
        let mut record = resource_record(b"hello");
        let mut out = Vec::new();
        let n = marshal_record(&mut record, &mut out).unwrap();
        assert_eq!(n, out.len() as u64);

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("WARC/1.1\r\n"));
        assert!(text.contains("WARC-Type: resource\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("hello\r\n\r\n"));
    }

    #[test]
    fn byte_count_matches_marshaled_length() {
        let mut record = resource_record(b"");
        let mut out = Vec::new();
        let n = marshal_record(&mut record, &mut out).unwrap();
        assert_eq!(n as usize, out.len());
    }

    #[test]
    fn round_trips_through_the_unmarshaler() {
        use crate::options::UnmarshalOptions;
        use crate::unmarshal::Unmarshaler;
        use std::io::{Cursor, Read};

        let mut record = resource_record(b"round trip body");
        let mut out = Vec::new();
        marshal_record(&mut record, &mut out).unwrap();

        let mut u = Unmarshaler::new(Cursor::new(out), UnmarshalOptions::default()).unwrap();
        let (mut parsed, validation) = u.next_record().unwrap().unwrap();
        assert!(validation.valid(), "{validation}");
        let mut body = Vec::new();
        parsed.block().raw_bytes().unwrap().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"round trip body");
    }
}
