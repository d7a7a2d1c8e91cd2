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

//! `application/warc-fields` blocks: the payload is itself a name/value list
//! (`warcinfo`, and `metadata` records that carry structured data).

use std::io::{Cursor, Read};

use crate::block::CachedBytes;
use crate::digest::{Algorithm, Encoding};
use crate::error::{Policy, Result, ValidationCollector};
use crate::fields::WarcFields;
use crate::fields_parser::parse_fields;
use crate::io::SpillBuffer;

pub struct WarcFieldsBlock {
    pub(crate) cached: CachedBytes,
    fields: WarcFields,
}

impl WarcFieldsBlock {
    /// Parse `buf` as a warc-fields block. When `fix` is set and parsing
    /// surfaced recoverable problems, the block's canonical bytes are
    /// rewritten from the parsed model (and the block digest recomputed on
    /// next access), per `FixWarcFieldsBlockErrors`.
    pub fn parse(
        mut buf: SpillBuffer,
        size: u64,
        alg: Algorithm,
        encoding: Encoding,
        syntax_policy: Policy,
        fix: bool,
        validation: &mut ValidationCollector,
    ) -> Result<Self> {
        buf.rewind()?;
        let mut content = Vec::new();
        buf.read_to_end(&mut content)?;

        let mut local_validation = ValidationCollector::new();
        let mut cursor = Cursor::new(&content[..]);
        let fields = parse_fields(&mut cursor, syntax_policy, &mut local_validation)?;
        let had_issues = !local_validation.valid();
        validation.extend(local_validation);

        let (final_buf, final_size) = if fix && had_issues {
            let mut rewritten = SpillBuffer::with_defaults();
            fields.write(&mut rewritten)?;
            let len = rewritten.size();
            rewritten.rewind()?;
            (rewritten, len)
        } else {
            let mut restored = SpillBuffer::with_defaults();
            restored.write(&content)?;
            restored.rewind()?;
            (restored, size)
        };

        Ok(Self {
            cached: CachedBytes::new(final_buf, final_size, alg, encoding),
            fields,
        })
    }

    pub fn fields(&self) -> &WarcFields {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_of(bytes: &[u8]) -> SpillBuffer {
        let mut buf = SpillBuffer::with_defaults();
        buf.write(bytes).unwrap();
        buf.rewind().unwrap();
        buf
    }

    #[test]
    fn parses_name_value_pairs() {
        let raw = b"software: test-crawler/1.0\r\nformat: WARC File Format 1.1\r\n\r\n";
        let mut validation = ValidationCollector::new();
        let block = WarcFieldsBlock::parse(
            buffer_of(raw),
            raw.len() as u64,
            Algorithm::Sha1,
            Encoding::Base32,
            Policy::Warn,
            false,
            &mut validation,
        )
        .unwrap();
        assert_eq!(block.fields().get("Software"), Some("test-crawler/1.0"));
        assert!(validation.valid());
    }

    #[test]
    fn fix_rewrites_canonical_bytes_on_recoverable_error() {
        // Missing the blank-line terminator: a recoverable (warn-level) problem.
        let raw = b"software: test-crawler/1.0\r\n";
        let mut validation = ValidationCollector::new();
        let mut block = WarcFieldsBlock::parse(
            buffer_of(raw),
            raw.len() as u64,
            Algorithm::Sha1,
            Encoding::Base32,
            Policy::Warn,
            true,
            &mut validation,
        )
        .unwrap();
        assert!(!validation.valid());

        let mut out = Vec::new();
        block.cached.raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Software: test-crawler/1.0\r\n");
    }
}
