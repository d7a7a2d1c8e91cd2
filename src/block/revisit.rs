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

//! A revisit block: only the protocol-header bytes of the record being
//! revisited. The payload digest is carried verbatim from the original
//! record rather than recomputed, since the revisit block has no payload.

use crate::block::CachedBytes;
use crate::digest::{Algorithm, Encoding};
use crate::error::Result;
use crate::io::SpillBuffer;

pub struct RevisitBlock {
    pub(crate) cached: CachedBytes,
    payload_digest_verbatim: Option<String>,
}

impl RevisitBlock {
    pub fn new(
        header_bytes: Vec<u8>,
        alg: Algorithm,
        encoding: Encoding,
        payload_digest_verbatim: Option<String>,
    ) -> Result<Self> {
        let mut buf = SpillBuffer::with_defaults();
        buf.write(&header_bytes)?;
        let size = header_bytes.len() as u64;
        buf.rewind()?;
        Ok(Self {
            cached: CachedBytes::new(buf, size, alg, encoding),
            payload_digest_verbatim,
        })
    }

    /// The payload digest carried over from the revisited record, if any.
    /// Never recomputed: the revisit block itself has no payload.
    pub fn payload_digest(&self) -> Option<&str> {
        self.payload_digest_verbatim.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn holds_header_bytes_and_verbatim_payload_digest() {
        let mut block = RevisitBlock::new(
            b"HTTP/1.1 304 Not Modified\r\n\r\n".to_vec(),
            Algorithm::Sha1,
            Encoding::Base32,
            Some("sha1:deadbeef".to_string()),
        )
        .unwrap();

        let mut out = Vec::new();
        block.cached.raw_bytes().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"HTTP/1.1 304 Not Modified\r\n\r\n");
        assert_eq!(block.payload_digest(), Some("sha1:deadbeef"));
    }
}
