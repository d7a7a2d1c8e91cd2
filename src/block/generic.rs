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

//! The opaque "generic" block: either an already-seekable, cached buffer, or
//! a one-shot stream that may be read exactly once.

use std::io::{self, Read};

use crate::digest::{Algorithm, Digest, Encoding};
use crate::error::{Error, Result};
use crate::io::SpillBuffer;

enum Source {
    Cached(SpillBuffer),
    /// `None` once the stream has been handed out via [`GenericBlock::raw_bytes`].
    Stream(Option<Box<dyn Read + Send>>),
}

pub struct GenericBlock {
    source: Source,
    size: u64,
    alg: Algorithm,
    encoding: Encoding,
    cached_digest: Option<String>,
    running_digest: Option<Digest>,
    consumed: bool,
}

impl GenericBlock {
    pub fn from_cached(buf: SpillBuffer, size: u64, alg: Algorithm, encoding: Encoding) -> Self {
        Self {
            source: Source::Cached(buf),
            size,
            alg,
            encoding,
            cached_digest: None,
            running_digest: None,
            consumed: false,
        }
    }

    pub fn from_reader(reader: Box<dyn Read + Send>, size: u64, alg: Algorithm, encoding: Encoding) -> Self {
        Self {
            source: Source::Stream(Some(reader)),
            size,
            alg,
            encoding,
            cached_digest: None,
            running_digest: None,
            consumed: false,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.source, Source::Cached(_))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn raw_bytes(&mut self) -> Result<Box<dyn Read + '_>> {
        match &mut self.source {
            Source::Cached(buf) => {
                buf.rewind()?;
                Ok(Box::new(&mut *buf))
            }
            Source::Stream(slot) => {
                if self.consumed {
                    return Err(Error::ContentReAccessed);
                }
                self.consumed = true;
                let inner = slot.take().ok_or(Error::ContentReAccessed)?;
                if self.running_digest.is_none() {
                    self.running_digest = Some(Digest::new(self.alg, self.encoding));
                }
                Ok(Box::new(crate::digest::TeeReader::new(
                    inner,
                    vec![self.running_digest.as_mut().unwrap()],
                )))
            }
        }
    }

    /// Idempotent; for an uncached block this trusts that the single
    /// permitted read (via `raw_bytes` or this call) fully drained the
    /// stream.
    pub fn block_digest(&mut self) -> Result<String> {
        if let Some(d) = &self.cached_digest {
            return Ok(d.clone());
        }
        match &mut self.source {
            Source::Cached(buf) => {
                buf.rewind()?;
                let mut digest = Digest::new(self.alg, self.encoding);
                io::copy(buf, &mut digest)?;
                let s = digest.format();
                self.cached_digest = Some(s.clone());
                Ok(s)
            }
            Source::Stream(slot) => {
                if let Some(mut inner) = slot.take() {
                    if self.consumed {
                        return Err(Error::ContentReAccessed);
                    }
                    self.consumed = true;
                    let mut digest = self.running_digest.take().unwrap_or_else(|| Digest::new(self.alg, self.encoding));
                    io::copy(&mut inner, &mut digest)?;
                    let s = digest.format();
                    self.cached_digest = Some(s.clone());
                    Ok(s)
                } else {
                    let digest = self.running_digest.take().ok_or(Error::ContentReAccessed)?;
                    let s = digest.format();
                    self.cached_digest = Some(s.clone());
                    Ok(s)
                }
            }
        }
    }

    /// Drain a streaming block into a [`SpillBuffer`] so it becomes
    /// repeatably readable. No-op if already cached.
    pub fn cache(&mut self) -> Result<()> {
        if self.is_cached() {
            return Ok(());
        }
        let mut buf = SpillBuffer::with_defaults();
        if let Source::Stream(slot) = &mut self.source {
            let mut inner = slot.take().ok_or(Error::ContentReAccessed)?;
            buf.read_from(&mut inner)?;
        }
        buf.rewind()?;
        self.source = Source::Cached(buf);
        self.consumed = false;
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        if let Source::Cached(buf) = self.source {
            buf.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_block_can_be_read_twice() {
        let mut buf = SpillBuffer::with_defaults();
        buf.write(b"hello").unwrap();
        buf.rewind().unwrap();
        let mut block = GenericBlock::from_cached(buf, 5, Algorithm::Sha1, Encoding::Base32);

        let mut out = Vec::new();
        block.raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");

        let mut out2 = Vec::new();
        block.raw_bytes().unwrap().read_to_end(&mut out2).unwrap();
        assert_eq!(out2, b"hello");
    }

    #[test]
    fn streamed_block_cannot_be_read_twice() {
        let mut block = GenericBlock::from_reader(Box::new(&b"hello"[..]), 5, Algorithm::Sha1, Encoding::Base16);
        let mut out = Vec::new();
        block.raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
        assert!(matches!(block.raw_bytes(), Err(Error::ContentReAccessed)));
    }

    #[test]
    fn streamed_block_digest_after_drain_matches_direct_hash() {
        let mut block = GenericBlock::from_reader(Box::new(&b"foo"[..]), 3, Algorithm::Sha1, Encoding::Base16);
        let mut out = Vec::new();
        block.raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        let digest = block.block_digest().unwrap();
        assert_eq!(digest, "sha1:0BEEC7B5EA3F0FDBC95D0DD47F3C5BC275DA8A33");
    }

    #[test]
    fn cache_promotes_stream_to_repeatable() {
        let mut block = GenericBlock::from_reader(Box::new(&b"hello"[..]), 5, Algorithm::Sha1, Encoding::Base16);
        block.cache().unwrap();
        assert!(block.is_cached());
        let mut out = Vec::new();
        block.raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
        let mut out2 = Vec::new();
        block.raw_bytes().unwrap().read_to_end(&mut out2).unwrap();
        assert_eq!(out2, b"hello");
    }
}
