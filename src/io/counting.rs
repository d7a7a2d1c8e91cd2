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

//! Reader adapters that each carry a single contract: count bytes read, or
//! cap reads at a byte ceiling. Kept separate (rather than one do-everything
//! reader) per Design Notes §9: "explicit reader adapters that each carry
//! their contract in the type".

use std::io::{self, Read};

/// Counts bytes consumed through it without otherwise changing behavior.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// When the wrapped reader is itself buffered, delegate `fill_buf`/`consume`
/// directly so the count reflects bytes the caller has logically consumed
/// (via `read_line`/`read_until`) rather than however much the buffer
/// happened to read ahead.
impl<R: std::io::BufRead> std::io::BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
        self.count += amt as u64;
    }
}

/// Caps reads at `limit` bytes total, after which it reports end-of-stream
/// without touching the underlying reader further.
pub struct LimitedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> LimitedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read and discard whatever is left up to the limit.
    pub fn drain(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            total += n as u64;
        }
        Ok(total)
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_reader_tracks_bytes() {
        let mut r = CountingReader::new(&b"hello world"[..]);
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(r.count(), 11);
    }

    #[test]
    fn limited_reader_stops_at_limit() {
        let mut r = LimitedReader::new(&b"hello world"[..], 5);
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn limited_reader_drain_consumes_remainder() {
        let mut r = LimitedReader::new(&b"0123456789"[..], 7);
        let mut first = [0u8; 3];
        r.read_exact(&mut first).unwrap();
        let drained = r.drain().unwrap();
        assert_eq!(drained, 4);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn limit_larger_than_input_reads_all() {
        let mut r = LimitedReader::new(&b"short"[..], 100);
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"short");
    }
}
