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

//! Streaming digests over the four algorithms WARC recognizes, with
//! auto-detecting textual encoding.

use std::io::{self, Read, Write};
use std::str::FromStr;

use digest::Digest as _;

use crate::error::{DigestKind, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length in bytes of the raw (undigested-to-text) hash.
    pub fn raw_len(self) -> usize {
        match self {
            Algorithm::Md5 => 16,
            Algorithm::Sha1 => 20,
            Algorithm::Sha256 => 32,
            Algorithm::Sha512 => 64,
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Algorithm::Md5),
            "sha1" => Ok(Algorithm::Sha1),
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(Error::HeaderFieldError {
                field: "WARC-Block-Digest".to_string(),
                message: format!("unknown digest algorithm '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Base16,
    Base32,
    Base64,
}

fn codec(enc: Encoding) -> &'static data_encoding::Encoding {
    match enc {
        Encoding::Base16 => &data_encoding::HEXUPPER,
        Encoding::Base32 => &data_encoding::BASE32,
        Encoding::Base64 => &data_encoding::BASE64,
    }
}

/// Resolve the encoding used to produce `hash_str`, given the algorithm's
/// raw digest length and a default to fall back on when the length is
/// genuinely ambiguous.
///
/// See spec invariant I3 (§8): round-trips for every (alg, encoding) pair in
/// the supported matrix, with the MD5 base16/base32 ambiguity broken by a
/// trailing `=`.
pub fn detect_encoding(alg: Algorithm, hash_str: &str, default: Encoding) -> Encoding {
    let l = alg.raw_len();
    let base16_len = 2 * l;
    let base32_len = data_encoding::BASE32.encode_len(l);
    let base64_len = data_encoding::BASE64.encode_len(l);

    let is_base16 = hash_str.len() == base16_len
        && hash_str.bytes().all(|b| b.is_ascii_hexdigit());
    let is_base32 = hash_str.len() == base32_len;
    let is_base64 = hash_str.len() == base64_len;

    match (is_base16, is_base32, is_base64) {
        (true, true, _) => {
            // Ambiguous only for MD5 (16 bytes -> 32 hex chars == 32 base32 chars
            // before padding). Standard base32 always pads to a multiple of 8.
            if hash_str.ends_with('=') {
                Encoding::Base32
            } else {
                Encoding::Base16
            }
        }
        (true, false, _) => Encoding::Base16,
        (false, true, _) => Encoding::Base32,
        (false, false, true) => Encoding::Base64,
        _ => default,
    }
}

enum Hasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl Hasher {
    fn new(alg: Algorithm) -> Self {
        match alg {
            Algorithm::Md5 => Hasher::Md5(md5::Md5::new()),
            Algorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            Algorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_copy(&self) -> Vec<u8> {
        match self {
            Hasher::Md5(h) => h.clone().finalize().to_vec(),
            Hasher::Sha1(h) => h.clone().finalize().to_vec(),
            Hasher::Sha256(h) => h.clone().finalize().to_vec(),
            Hasher::Sha512(h) => h.clone().finalize().to_vec(),
        }
    }
}

/// A streaming digest: write bytes to it, then `format` or `validate`.
///
/// Constructed either from a header string (`alg[:hash]`, via [`Digest::from_header`])
/// or directly from an algorithm plus encoding (via [`Digest::new`]).
pub struct Digest {
    alg: Algorithm,
    encoding: Encoding,
    hasher: Hasher,
    bytes_written: u64,
    expected: Option<String>,
}

impl Digest {
    pub fn new(alg: Algorithm, encoding: Encoding) -> Self {
        Self {
            alg,
            encoding,
            hasher: Hasher::new(alg),
            bytes_written: 0,
            expected: None,
        }
    }

    /// Parse `alg[:hash]` (the shape WARC digest headers use) and build a
    /// digest primed to `validate()` against the embedded hash, auto-detecting
    /// its encoding.
    pub fn from_header(header: &str, default_encoding: Encoding) -> Result<Self> {
        let (alg_str, hash) = header
            .split_once(':')
            .ok_or_else(|| Error::HeaderFieldError {
                field: "WARC-Block-Digest".to_string(),
                message: format!("digest value '{header}' is missing an ':' separator"),
            })?;
        let alg: Algorithm = alg_str.parse()?;
        let encoding = detect_encoding(alg, hash, default_encoding);

        let normalized = match encoding {
            Encoding::Base16 | Encoding::Base32 => hash.to_ascii_uppercase(),
            Encoding::Base64 => hash.to_string(),
        };

        Ok(Self {
            alg,
            encoding,
            hasher: Hasher::new(alg),
            bytes_written: 0,
            expected: Some(normalized),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.alg
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Feed bytes into the running hash. Never fails.
    pub fn write(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
    }

    /// `"<alg>:<encoded>"` using the digest's encoding.
    pub fn format(&self) -> String {
        let raw = self.hasher.finalize_copy();
        format!("{}:{}", self.alg.name(), codec(self.encoding).encode(&raw))
    }

    /// Compare the currently-accumulated hash against the value captured at
    /// construction time (via [`Digest::from_header`]).
    pub fn validate(&self, kind: DigestKind) -> Result<()> {
        let raw = self.hasher.finalize_copy();
        let computed = codec(self.encoding).encode(&raw);
        let computed_cmp = match self.encoding {
            Encoding::Base16 | Encoding::Base32 => computed.to_ascii_uppercase(),
            Encoding::Base64 => computed.clone(),
        };

        match &self.expected {
            Some(expected) if expected == &computed_cmp => Ok(()),
            Some(expected) => Err(Error::DigestMismatch {
                kind,
                expected: format!("{}:{}", self.alg.name(), expected),
                computed: format!("{}:{}", self.alg.name(), computed),
            }),
            None => Ok(()),
        }
    }
}

impl Write for Digest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Digest::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Tees reads from `inner` through one or more digest sinks, so that fully
/// draining the reader leaves every digest populated as a side effect.
pub struct TeeReader<'a, R> {
    inner: R,
    sinks: Vec<&'a mut Digest>,
}

impl<'a, R: Read> TeeReader<'a, R> {
    pub fn new(inner: R, sinks: Vec<&'a mut Digest>) -> Self {
        Self { inner, sinks }
    }
}

impl<'a, R: Read> Read for TeeReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for sink in self.sinks.iter_mut() {
            sink.write(&buf[..n]);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_header_roundtrip() {
        // S5
        let mut d =
            Digest::from_header("sha1:0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33", Encoding::Base16)
                .unwrap();
        d.write(b"foo");
        assert_eq!(
            d.format(),
            "sha1:0BEEC7B5EA3F0FDBC95D0DD47F3C5BC275DA8A33"
        );
        d.validate(DigestKind::Block).unwrap();
    }

    #[test]
    fn detect_base32_vs_base16_for_md5() {
        let mut hasher = md5::Md5::new();
        hasher.update(b"hello");
        let raw = hasher.finalize();

        let hex = data_encoding::HEXUPPER.encode(&raw);
        let b32 = data_encoding::BASE32.encode(&raw);

        assert_eq!(detect_encoding(Algorithm::Md5, &hex, Encoding::Base16), Encoding::Base16);
        assert_eq!(detect_encoding(Algorithm::Md5, &b32, Encoding::Base16), Encoding::Base32);
    }

    #[test]
    fn sha256_base32_roundtrip() {
        let mut hasher = sha2::Sha256::new();
        hasher.update(b"payload");
        let raw = hasher.finalize();
        let b32 = data_encoding::BASE32.encode(&raw);

        let mut d = Digest::from_header(&format!("sha256:{b32}"), Encoding::Base32).unwrap();
        d.write(b"payload");
        assert_eq!(d.encoding(), Encoding::Base32);
        d.validate(DigestKind::Payload).unwrap();
    }

    #[test]
    fn mismatch_reports_both_values() {
        let mut d =
            Digest::from_header("sha1:0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33", Encoding::Base16)
                .unwrap();
        d.write(b"not foo");
        let err = d.validate(DigestKind::Block).unwrap_err();
        match err {
            Error::DigestMismatch { expected, computed, .. } => {
                assert!(expected.starts_with("sha1:0BEEC7B5"));
                assert_ne!(expected, computed);
            }
            _ => panic!("wrong error variant"),
        }
    }

    #[test]
    fn tee_reader_fills_digest() {
        let mut d = Digest::new(Algorithm::Sha1, Encoding::Base16);
        {
            let mut tee = TeeReader::new(&b"foo"[..], vec![&mut d]);
            let mut buf = Vec::new();
            tee.read_to_end(&mut buf).unwrap();
        }
        assert_eq!(d.format(), "sha1:0BEEC7B5EA3F0FDBC95D0DD47F3C5BC275DA8A33");
    }
}
