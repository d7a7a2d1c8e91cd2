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

//! Block variants (§4.7): generic, warc-fields, HTTP, and revisit. Every
//! variant exposes the same capability set — raw bytes, block digest,
//! cached-ness, size, close — dispatched through the [`Block`] enum rather
//! than a trait object, mirroring how [`crate::record_type::RecordType`]
//! tags rather than boxes its variants.

mod generic;
mod http;
mod revisit;
mod warc_fields;

pub use generic::GenericBlock;
pub use http::{HttpBlock, HttpKind};
pub use revisit::RevisitBlock;
pub use warc_fields::WarcFieldsBlock;

use std::io::{self, Read};

use crate::digest::{Algorithm, Digest, Encoding};
use crate::error::Result;
use crate::io::SpillBuffer;

/// Shared body for the three block variants that are always fully cached
/// (warc-fields, HTTP, revisit): a rewindable [`SpillBuffer`] plus a
/// lazily-computed, memoized digest over its entire content.
pub(crate) struct CachedBytes {
    buf: SpillBuffer,
    size: u64,
    alg: Algorithm,
    encoding: Encoding,
    cached_digest: Option<String>,
}

impl CachedBytes {
    pub(crate) fn new(buf: SpillBuffer, size: u64, alg: Algorithm, encoding: Encoding) -> Self {
        Self { buf, size, alg, encoding, cached_digest: None }
    }

    pub(crate) fn raw_bytes(&mut self) -> Result<Box<dyn Read + '_>> {
        self.buf.rewind()?;
        Ok(Box::new(&mut self.buf))
    }

    pub(crate) fn digest(&mut self) -> Result<String> {
        if let Some(d) = &self.cached_digest {
            return Ok(d.clone());
        }
        self.buf.rewind()?;
        let mut digest = Digest::new(self.alg, self.encoding);
        io::copy(&mut self.buf, &mut digest)?;
        let s = digest.format();
        self.cached_digest = Some(s.clone());
        Ok(s)
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn close(self) -> Result<()> {
        self.buf.close()?;
        Ok(())
    }
}

/// A record's payload, in one of four shapes. See §3 "Block".
pub enum Block {
    Generic(GenericBlock),
    WarcFields(WarcFieldsBlock),
    Http(HttpBlock),
    Revisit(RevisitBlock),
}

impl Block {
    /// A reader over the block's raw bytes. Cached blocks may be read any
    /// number of times; uncached blocks exactly once, after which this
    /// returns [`Error::ContentReAccessed`].
    pub fn raw_bytes(&mut self) -> Result<Box<dyn Read + '_>> {
        match self {
            Block::Generic(b) => b.raw_bytes(),
            Block::WarcFields(b) => b.cached.raw_bytes(),
            Block::Http(b) => b.cached.raw_bytes(),
            Block::Revisit(b) => b.cached.raw_bytes(),
        }
    }

    /// `"<alg>:<encoded>"` over the whole block. Idempotent.
    pub fn block_digest(&mut self) -> Result<String> {
        match self {
            Block::Generic(b) => b.block_digest(),
            Block::WarcFields(b) => b.cached.digest(),
            Block::Http(b) => b.cached.digest(),
            Block::Revisit(b) => b.cached.digest(),
        }
    }

    pub fn is_cached(&self) -> bool {
        match self {
            Block::Generic(b) => b.is_cached(),
            Block::WarcFields(_) | Block::Http(_) | Block::Revisit(_) => true,
        }
    }

    /// Force an uncached block to spill its remaining content to a
    /// [`SpillBuffer`], becoming repeatably readable. A no-op on blocks
    /// that are already cached.
    pub fn cache(&mut self) -> Result<()> {
        match self {
            Block::Generic(b) => b.cache(),
            Block::WarcFields(_) | Block::Http(_) | Block::Revisit(_) => Ok(()),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Block::Generic(b) => b.size(),
            Block::WarcFields(b) => b.cached.size(),
            Block::Http(b) => b.cached.size(),
            Block::Revisit(b) => b.cached.size(),
        }
    }

    pub fn close(self) -> Result<()> {
        match self {
            Block::Generic(b) => b.close(),
            Block::WarcFields(b) => b.cached.close(),
            Block::Http(b) => b.cached.close(),
            Block::Revisit(b) => b.cached.close(),
        }
    }
}

/// Pick the concrete [`Block`] variant for a freshly-assembled or
/// freshly-parsed record, by `WARC-Type` and `Content-Type`. Shared by
/// [`crate::builder::RecordBuilder`] and [`crate::unmarshal::Unmarshaler`] so
/// the two entry points agree on dispatch rules.
#[allow(clippy::too_many_arguments)]
pub(crate) fn dispatch_block(
    record_type: &crate::record_type::RecordType,
    header: &crate::fields::WarcFields,
    body: SpillBuffer,
    size: u64,
    alg: Algorithm,
    encoding: Encoding,
    syntax_policy: crate::error::Policy,
    fix_warc_fields: bool,
    validation: &mut crate::error::ValidationCollector,
) -> Result<Block> {
    use crate::record_type::RecordType;

    let content_type = header.get("Content-Type").unwrap_or_default();

    if matches!(record_type, RecordType::Revisit) {
        let payload_digest = header.get("WARC-Payload-Digest").map(str::to_string);
        let mut buf = body;
        let mut bytes = Vec::new();
        buf.read_to_end(&mut bytes)?;
        return Ok(Block::Revisit(RevisitBlock::new(bytes, alg, encoding, payload_digest)?));
    }

    if content_type.eq_ignore_ascii_case("application/warc-fields") {
        let block = WarcFieldsBlock::parse(body, size, alg, encoding, syntax_policy, fix_warc_fields, validation)?;
        return Ok(Block::WarcFields(block));
    }

    if content_type.to_ascii_lowercase().starts_with("application/http") {
        let block = HttpBlock::parse(body, size, alg, encoding, alg, encoding, syntax_policy, validation)?;
        return Ok(Block::Http(block));
    }

    Ok(Block::Generic(GenericBlock::from_cached(body, size, alg, encoding)))
}
