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

//! The record type (§4.8): immutable accessors plus the revisit/merge
//! transforms and digest validation.

use std::io::Read;

use crate::block::{Block, GenericBlock, RevisitBlock};
use crate::digest::{detect_encoding, Algorithm, Encoding};
use crate::error::{DigestKind, Error, Policy, Result, ValidationCollector};
use crate::fields::WarcFields;
use crate::io::SpillBuffer;
use crate::record_type::{RecordType, Version};

/// One of the two registered revisit profiles (IIPC WARC profile registry).
/// Open Question 1 / §4.8: any other profile string fails with
/// [`Error::UnknownRevisitProfile`] rather than being modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisitProfile {
    ServerNotModified,
    IdenticalPayloadDigest,
}

impl RevisitProfile {
    pub fn uri(self) -> &'static str {
        match self {
            RevisitProfile::IdenticalPayloadDigest => {
                "http://netpreserve.org/warc/1.1/revisit/identical-payload-digest"
            }
            RevisitProfile::ServerNotModified => "http://netpreserve.org/warc/1.1/revisit/server-not-modified",
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        if uri.ends_with("/identical-payload-digest") {
            Ok(RevisitProfile::IdenticalPayloadDigest)
        } else if uri.ends_with("/server-not-modified") {
            Ok(RevisitProfile::ServerNotModified)
        } else {
            Err(Error::UnknownRevisitProfile(uri.to_string()))
        }
    }
}

/// A plain-value reference to a revisited record, either read off an
/// existing revisit record ([`Record::revisit_ref`]) or built fresh from a
/// non-revisit one ([`Record::create_revisit_ref`]).
#[derive(Debug, Clone)]
pub struct RevisitRef {
    pub profile: RevisitProfile,
    pub target_record_id: Option<String>,
    pub target_uri: Option<String>,
    pub target_date: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct Record {
    version: Version,
    record_type: RecordType,
    header: WarcFields,
    block: Block,
}

impl Record {
    pub fn new(version: Version, record_type: RecordType, header: WarcFields, block: Block) -> Self {
        Self { version, record_type, header, block }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    pub fn header(&self) -> &WarcFields {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut WarcFields {
        &mut self.header
    }

    pub fn block(&mut self) -> &mut Block {
        &mut self.block
    }

    pub fn close(self) -> Result<()> {
        self.block.close()
    }

    /// The record's own protocol-header bytes: for an HTTP block, the start
    /// line plus headers; for anything else, the whole block (there is no
    /// header/payload split to speak of).
    fn protocol_header_bytes(&mut self) -> Result<Vec<u8>> {
        match &mut self.block {
            Block::Http(b) => b.protocol_header_bytes(),
            _ => {
                let mut buf = Vec::new();
                self.block.raw_bytes()?.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }

    /// For a non-revisit record, build the reference a revisit of it would
    /// carry. Revisit records cannot create refs to themselves.
    pub fn create_revisit_ref(&self, profile: RevisitProfile) -> Result<RevisitRef> {
        if matches!(self.record_type, RecordType::Revisit) {
            return Err(Error::HeaderFieldError {
                field: "WARC-Type".to_string(),
                message: "revisit records cannot create a revisit reference".to_string(),
            });
        }
        Ok(RevisitRef {
            profile,
            target_record_id: self.header.get_uri_id("WARC-Record-ID").map(str::to_string),
            target_uri: self.header.get_uri_id("WARC-Target-URI").map(str::to_string),
            target_date: self.header.get_time("WARC-Date"),
        })
    }

    /// For a revisit record, the reference it carries (the inverse of
    /// [`Record::create_revisit_ref`]).
    pub fn revisit_ref(&self) -> Result<RevisitRef> {
        if !matches!(self.record_type, RecordType::Revisit) {
            return Err(Error::HeaderFieldError {
                field: "WARC-Type".to_string(),
                message: "record is not a revisit".to_string(),
            });
        }
        let profile_uri = self.header.get("WARC-Profile").ok_or_else(|| Error::HeaderFieldError {
            field: "WARC-Profile".to_string(),
            message: "revisit record is missing WARC-Profile".to_string(),
        })?;
        Ok(RevisitRef {
            profile: RevisitProfile::from_uri(profile_uri)?,
            target_record_id: self.header.get_uri_id("WARC-Refers-To").map(str::to_string),
            target_uri: self.header.get("WARC-Refers-To-Target-URI").map(str::to_string),
            target_date: self.header.get_time("WARC-Refers-To-Date"),
        })
    }

    /// Build a revisit record referring to `target`, per §4.8.
    pub fn to_revisit_record(&mut self, target: &RevisitRef, alg: Algorithm, encoding: Encoding) -> Result<Record> {
        let mut header = self.header.clone();

        if matches!(target.profile, RevisitProfile::IdenticalPayloadDigest) && !header.has("WARC-Payload-Digest") {
            if matches!(self.record_type, RecordType::Resource) {
                if let Some(block_digest) = header.get("WARC-Block-Digest").map(str::to_string) {
                    header.set("WARC-Payload-Digest", &block_digest);
                } else {
                    return Err(Error::RevisitMissingPayloadDigest);
                }
            } else {
                return Err(Error::RevisitMissingPayloadDigest);
            }
        }

        header.set("WARC-Type", "revisit");
        header.set("WARC-Profile", target.profile.uri());
        if let Some(id) = &target.target_record_id {
            header.set_uri_id("WARC-Refers-To", id);
        }
        if let Some(uri) = &target.target_uri {
            header.set("WARC-Refers-To-Target-URI", uri);
        }
        if let Some(date) = target.target_date {
            header.set_time("WARC-Refers-To-Date", date);
        }
        header.set("WARC-Truncated", "length");

        let header_bytes = self.protocol_header_bytes()?;
        let payload_digest_verbatim = header.get("WARC-Payload-Digest").map(str::to_string);
        let mut block = Block::Revisit(RevisitBlock::new(header_bytes, alg, encoding, payload_digest_verbatim)?);

        let digest = block.block_digest()?;
        let size = block.size();
        header.set("WARC-Block-Digest", &digest);
        header.set_int64("Content-Length", size as i64);

        Ok(Record { version: self.version, record_type: RecordType::Revisit, header, block })
    }

    /// Compose this revisit with the record it refers to, producing a new
    /// record of the referenced record's type. Only legal on a revisit
    /// record; segmented records are not supported (Open Question 1).
    pub fn merge(&mut self, referenced: &mut Record, alg: Algorithm, encoding: Encoding) -> Result<Record> {
        if !matches!(self.record_type, RecordType::Revisit) {
            return Err(Error::MergeOnNonRevisit);
        }
        let segmented = self.header.has("WARC-Segment-Origin-ID")
            || self.header.has("WARC-Segment-Total-Length")
            || referenced.header.has("WARC-Segment-Origin-ID")
            || referenced.header.has("WARC-Segment-Total-Length");
        if segmented {
            return Err(Error::SegmentedMergeUnsupported);
        }

        let head = self.protocol_header_bytes()?;
        let referenced_cached = referenced.block.is_cached();
        let payload = match &mut referenced.block {
            Block::Http(b) => {
                let mut full = Vec::new();
                b.cached.raw_bytes()?.read_to_end(&mut full)?;
                full[b.header_len() as usize..].to_vec()
            }
            _ => {
                let mut buf = Vec::new();
                referenced.block.raw_bytes()?.read_to_end(&mut buf)?;
                buf
            }
        };

        let mut composed = head;
        composed.extend_from_slice(&payload);
        let size = composed.len() as u64;

        let mut header = referenced.header.clone();
        header.set("WARC-Type", referenced.record_type.as_str());
        header.delete("WARC-Refers-To");
        header.delete("WARC-Refers-To-Target-URI");
        header.delete("WARC-Refers-To-Date");
        header.delete("WARC-Profile");
        let truncated = referenced.header.get("WARC-Truncated").map(str::to_string);
        header.delete("WARC-Truncated");
        if let Some(t) = truncated {
            header.set("WARC-Truncated", &t);
        }
        if let Some(pd) = self.header.get("WARC-Payload-Digest").map(str::to_string) {
            header.set("WARC-Payload-Digest", &pd);
        }
        header.set_int64("Content-Length", size as i64);

        let mut buf = SpillBuffer::with_defaults();
        buf.write(&composed)?;
        buf.rewind()?;
        let mut block = Block::Generic(GenericBlock::from_cached(buf, size, alg, encoding));

        if referenced_cached {
            let digest = block.block_digest()?;
            header.set("WARC-Block-Digest", &digest);
        } else {
            header.delete("WARC-Block-Digest");
        }

        Ok(Record { version: referenced.version, record_type: referenced.record_type.clone(), header, block })
    }

    /// Force a full read of the block, then check/fix `Content-Length` and
    /// block/payload digests per the supplied policy and `Fix*`/`AddMissing*`
    /// flags (§4.8).
    #[allow(clippy::too_many_arguments)]
    pub fn validate_digest(
        &mut self,
        policy: Policy,
        add_missing_digest: bool,
        fix_digest: bool,
        add_missing_content_length: bool,
        fix_content_length: bool,
        default_encoding: Encoding,
        validation: &mut ValidationCollector,
    ) -> Result<()> {
        let observed = self.block.size();
        match self.header.get("Content-Length").and_then(|v| v.parse::<u64>().ok()) {
            Some(declared) if declared != observed => {
                if fix_content_length {
                    self.header.set_int64("Content-Length", observed as i64);
                }
                policy.apply(validation, || Error::ContentLengthMismatch { expected: declared, computed: observed })?;
            }
            None if add_missing_content_length => {
                self.header.set_int64("Content-Length", observed as i64);
            }
            _ => {}
        }

        self.validate_one_digest(
            DigestKind::Block,
            add_missing_digest,
            fix_digest,
            default_encoding,
            policy,
            validation,
        )?;

        let skip_payload = matches!(self.record_type, RecordType::Revisit) || self.header.has("WARC-Segment-Origin-ID");
        if !skip_payload {
            self.validate_one_digest(
                DigestKind::Payload,
                add_missing_digest,
                fix_digest,
                default_encoding,
                policy,
                validation,
            )?;
        }

        Ok(())
    }

    fn validate_one_digest(
        &mut self,
        kind: DigestKind,
        add_missing: bool,
        fix: bool,
        _default_encoding: Encoding,
        policy: Policy,
        validation: &mut ValidationCollector,
    ) -> Result<()> {
        let field = match kind {
            DigestKind::Block => "WARC-Block-Digest",
            DigestKind::Payload => "WARC-Payload-Digest",
        };

        let computed = if matches!(kind, DigestKind::Block) {
            self.block.block_digest()?
        } else if matches!(&self.block, Block::Http(_)) {
            match &mut self.block {
                Block::Http(b) => b.payload_digest()?,
                _ => unreachable!(),
            }
        } else if matches!(&self.block, Block::Revisit(_)) {
            let verbatim = match &self.block {
                Block::Revisit(b) => b.payload_digest().map(str::to_string),
                _ => unreachable!(),
            };
            match verbatim {
                Some(s) => s,
                None => return Ok(()),
            }
        } else {
            self.block.block_digest()?
        };

        match self.header.get(field).map(str::to_string) {
            Some(declared) => {
                if !digests_equal(&declared, &computed) {
                    if fix {
                        self.header.set(field, &computed);
                    }
                    policy.apply(validation, || Error::DigestMismatch {
                        kind,
                        expected: declared.clone(),
                        computed: computed.clone(),
                    })?;
                }
            }
            None if add_missing => {
                self.header.set(field, &computed);
            }
            None => {}
        }
        Ok(())
    }
}

/// Compare two `"alg:hash"` strings for equality, tolerating the hash's
/// textual case for base16/base32 (case-sensitive only for base64).
fn digests_equal(a: &str, b: &str) -> bool {
    fn normalize(s: &str) -> Option<(String, String)> {
        let (alg_str, hash) = s.split_once(':')?;
        let alg: Algorithm = alg_str.parse().ok()?;
        let enc = detect_encoding(alg, hash, Encoding::Base32);
        let hash_norm = match enc {
            Encoding::Base64 => hash.to_string(),
            _ => hash.to_ascii_uppercase(),
        };
        Some((alg.name().to_string(), hash_norm))
    }
    match (normalize(a), normalize(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::block::GenericBlock;

    fn resource_record(body: &[u8]) -> Record {
        let mut header = WarcFields::new();
        header.set_uri_id("WARC-Record-ID", "urn:uuid:00000000-0000-0000-0000-000000000001");
        header.set("WARC-Date", "2017-03-06T04:03:53Z");
        header.set("WARC-Type", "resource");
        header.set("WARC-Target-URI", "http://example.com/");
        header.set_int64("Content-Length", body.len() as i64);

        let mut buf = SpillBuffer::with_defaults();
        buf.write(body).unwrap();
        buf.rewind().unwrap();
        let block = Block::Generic(GenericBlock::from_cached(buf, body.len() as u64, Algorithm::Sha1, Encoding::Base32));
        Record::new(Version::V1_1, RecordType::Resource, header, block)
    }

    #[test]
    fn create_and_apply_revisit_ref() {
        let record = resource_record(b"hello");
        let target = record.create_revisit_ref(RevisitProfile::ServerNotModified).unwrap();
        assert_eq!(target.target_uri.as_deref(), Some("http://example.com/"));
    }

    #[test]
    fn to_revisit_record_requires_payload_digest_for_identical_profile() {
        let mut record = resource_record(b"hello");
        let target = RevisitRef {
            profile: RevisitProfile::IdenticalPayloadDigest,
            target_record_id: Some("urn:uuid:00000000-0000-0000-0000-000000000001".to_string()),
            target_uri: None,
            target_date: None,
        };
        let err = record.to_revisit_record(&target, Algorithm::Sha1, Encoding::Base32).unwrap_err();
        assert!(matches!(err, Error::RevisitMissingPayloadDigest));
    }

    #[test]
    fn to_revisit_record_promotes_block_digest_for_resource() {
        let mut record = resource_record(b"hello");
        record.header_mut().set("WARC-Block-Digest", "sha1:AAAA");
        let target = RevisitRef {
            profile: RevisitProfile::IdenticalPayloadDigest,
            target_record_id: Some("urn:uuid:00000000-0000-0000-0000-000000000001".to_string()),
            target_uri: None,
            target_date: None,
        };
        let revisit = record.to_revisit_record(&target, Algorithm::Sha1, Encoding::Base32).unwrap();
        assert_eq!(revisit.header().get("WARC-Payload-Digest"), Some("sha1:AAAA"));
        assert_eq!(revisit.header().get("WARC-Type"), Some("revisit"));
    }

    #[test]
    fn merge_rejects_non_revisit_self() {
        let mut record = resource_record(b"hello");
        let mut other = resource_record(b"world");
        let err = record.merge(&mut other, Algorithm::Sha1, Encoding::Base32).unwrap_err();
        assert!(matches!(err, Error::MergeOnNonRevisit));
    }

    #[test]
    fn merge_rejects_segmented_records() {
        let mut record = resource_record(b"hello");
        record.header_mut().set("WARC-Type", "revisit");
        record.record_type = RecordType::Revisit;
        record.header_mut().set_uri_id("WARC-Segment-Origin-ID", "urn:uuid:seg");
        let mut other = resource_record(b"world");
        let err = record.merge(&mut other, Algorithm::Sha1, Encoding::Base32).unwrap_err();
        assert!(matches!(err, Error::SegmentedMergeUnsupported));
    }

    #[test]
    fn validate_digest_fixes_content_length_when_requested() {
        let mut record = resource_record(b"hello");
        record.header_mut().set_int64("Content-Length", 999);
        let mut validation = ValidationCollector::new();
        record
            .validate_digest(Policy::Warn, true, true, true, true, Encoding::Base32, &mut validation)
            .unwrap();
        assert_eq!(record.header().get("Content-Length"), Some("5"));
        assert!(!validation.valid());
    }
}
