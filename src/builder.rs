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

//! Assembles a [`Record`] from scratch (§4.9): accumulate headers and body,
//! then `build()` reconciles `WARC-Record-ID`, `Content-Length`, and the
//! block digest before dispatching to the right [`Block`] variant.

use std::io::Read;

use chrono::{DateTime, Utc};

use crate::block::{dispatch_block, Block};
use crate::digest::{Algorithm, Digest, Encoding};
use crate::error::{Error, Result, ValidationCollector};
use crate::field_def::validate_header;
use crate::fields::WarcFields;
use crate::io::SpillBuffer;
use crate::options::BuildOptions;
use crate::record::Record;
use crate::record_type::{RecordType, Version};

/// Accumulates a record's header and body before [`RecordBuilder::build`]
/// turns it into a [`Record`].
pub struct RecordBuilder {
    version: Version,
    header: WarcFields,
    body: SpillBuffer,
    body_size: u64,
    options: BuildOptions,
}

impl RecordBuilder {
    pub fn new(record_type: RecordType, version: Version, options: BuildOptions) -> Self {
        let mut header = WarcFields::new();
        header.set("WARC-Type", record_type.as_str());
        Self {
            version,
            header,
            body: SpillBuffer::new(
                options.validation.buffer_tmp_dir.clone(),
                options.validation.buffer_max_mem_bytes,
            ),
            body_size: 0,
            options,
        }
    }

    pub fn add(&mut self, name: &str, value: &str) -> &mut Self {
        self.header.add(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: &str) -> &mut Self {
        self.header.set(name, value);
        self
    }

    pub fn add_int(&mut self, name: &str, value: i64) -> &mut Self {
        self.header.set_int(name, value);
        self
    }

    pub fn add_int64(&mut self, name: &str, value: i64) -> &mut Self {
        self.header.set_int64(name, value);
        self
    }

    pub fn add_time(&mut self, name: &str, value: DateTime<Utc>) -> &mut Self {
        self.header.set_time(name, value);
        self
    }

    pub fn header(&self) -> &WarcFields {
        &self.header
    }

    pub fn write(&mut self, data: &[u8]) -> Result<&mut Self> {
        self.body.write(data)?;
        self.body_size += data.len() as u64;
        Ok(self)
    }

    pub fn write_string(&mut self, s: &str) -> Result<&mut Self> {
        self.write(s.as_bytes())
    }

    pub fn read_from(&mut self, reader: impl Read) -> Result<u64> {
        let n = self.body.read_from(reader)?;
        self.body_size += n;
        Ok(n)
    }

    pub fn size(&self) -> u64 {
        self.body_size
    }

    /// Release the accumulated body without constructing a record.
    pub fn close(self) -> Result<()> {
        self.body.close()?;
        Ok(())
    }

    /// Reconcile headers against the accumulated body and construct the
    /// concrete [`Block`] variant, returning the finished record along with
    /// whatever non-fatal problems were recorded along the way.
    pub fn build(mut self) -> Result<(Record, ValidationCollector)> {
        let mut validation = ValidationCollector::new();

        if self.options.add_missing_record_id && !self.header.has("WARC-Record-ID") {
            let id = (self.options.record_id_func)();
            self.header.set("WARC-Record-ID", &id);
        }

        // Reconciled before `validateHeader` so a freshly-built record with
        // no explicit Content-Length doesn't spuriously trip the "required
        // field missing" check that a genuinely malformed record would.
        let declared_len = self.header.get_int("Content-Length").map(|n| n as u64);
        match declared_len {
            Some(declared) if declared != self.body_size => {
                if self.options.validation.fix_content_length {
                    self.header.set_int("Content-Length", self.body_size as i64);
                } else {
                    self.options.validation.spec_violation_policy.apply(&mut validation, || {
                        Error::ContentLengthMismatch { expected: declared, computed: self.body_size }
                    })?;
                }
            }
            None if self.options.add_missing_content_length => {
                self.header.set_int("Content-Length", self.body_size as i64);
            }
            None => {
                self.options.validation.spec_violation_policy.apply(&mut validation, || {
                    Error::HeaderFieldError {
                        field: "Content-Length".to_string(),
                        message: "required field is missing".to_string(),
                    }
                })?;
            }
            _ => {}
        }

        let record_type = validate_header(
            &self.header,
            self.version,
            self.options.validation.spec_violation_policy,
            self.options.validation.unknown_record_type_policy,
            &mut validation,
        )?;

        let alg = self.options.validation.default_digest_algorithm;
        let encoding = self.options.validation.default_digest_encoding;
        self.body.rewind()?;
        let computed_digest = {
            let mut digest = Digest::new(alg, encoding);
            std::io::copy(&mut self.body, &mut digest)?;
            digest.format()
        };

        match self.header.get("WARC-Block-Digest").map(str::to_string) {
            Some(declared) => {
                let mut d = Digest::from_header(&declared, encoding)?;
                self.body.rewind()?;
                std::io::copy(&mut self.body, &mut d)?;
                if d.validate(crate::error::DigestKind::Block).is_err() {
                    if self.options.validation.fix_digest {
                        self.header.set("WARC-Block-Digest", &computed_digest);
                    } else {
                        self.options.validation.spec_violation_policy.apply(&mut validation, || {
                            Error::DigestMismatch {
                                kind: crate::error::DigestKind::Block,
                                expected: declared.clone(),
                                computed: computed_digest.clone(),
                            }
                        })?;
                    }
                }
            }
            None if self.options.validation.add_missing_digest => {
                self.header.set("WARC-Block-Digest", &computed_digest);
            }
            None => {}
        }

        self.body.rewind()?;
        let block = dispatch_block(
            &record_type,
            &self.header,
            self.body,
            self.body_size,
            alg,
            encoding,
            self.options.validation.syntax_error_policy,
            self.options.validation.fix_warc_fields_block_errors,
            &mut validation,
        )?;

        Ok((Record::new(self.version, record_type, self.header, block), validation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> BuildOptions {
        BuildOptions::default()
            .with_record_id_func(std::sync::Arc::new(|| "<urn:uuid:deadbeef-0000-0000-0000-000000000000>".to_string()))
    }

    #[test]
    fn generates_missing_record_id() {
        let mut b = RecordBuilder::new(RecordType::Resource, Version::V1_1, opts());
        b.add("WARC-Date", "2017-03-06T04:03:53Z");
        b.set("Content-Type", "application/octet-stream");
        b.write(b"hello").unwrap();
        let (record, validation) = b.build().unwrap();
        assert!(validation.valid());
        assert_eq!(
            record.header().get("WARC-Record-ID"),
            Some("<urn:uuid:deadbeef-0000-0000-0000-000000000000>")
        );
    }

    #[test]
    fn reconciles_missing_content_length() {
        let mut b = RecordBuilder::new(RecordType::Resource, Version::V1_1, opts());
        b.add("WARC-Date", "2017-03-06T04:03:53Z");
        b.write(b"hello world").unwrap();
        let (record, _) = b.build().unwrap();
        assert_eq!(record.header().get("Content-Length"), Some("11"));
    }

    #[test]
    fn computes_block_digest_over_body() {
        let mut options = opts();
        options.validation.add_missing_digest = true;
        let mut b = RecordBuilder::new(RecordType::Resource, Version::V1_1, options);
        b.add("WARC-Date", "2017-03-06T04:03:53Z");
        b.set("Content-Type", "application/octet-stream");
        b.write(b"foo").unwrap();
        let (mut record, _) = b.build().unwrap();
        assert_eq!(
            record.header().get("WARC-Block-Digest"),
            Some("sha1:BPXMPNPKH4H5XSK5BXKH6PC3YJ25VCRT")
        );
        assert_eq!(record.block().block_digest().unwrap(), "sha1:BPXMPNPKH4H5XSK5BXKH6PC3YJ25VCRT");
    }

    #[test]
    fn dispatches_warc_fields_block_by_content_type() {
        let mut b = RecordBuilder::new(RecordType::Warcinfo, Version::V1_1, opts());
        b.add("WARC-Date", "2017-03-06T04:03:53Z");
        b.set("Content-Type", "application/warc-fields");
        b.write(b"software: test/1.0\r\n\r\n").unwrap();
        let (mut record, validation) = b.build().unwrap();
        assert!(validation.valid());
        match record.block() {
            Block::WarcFields(wf) => assert_eq!(wf.fields().get("Software"), Some("test/1.0")),
            _ => panic!("expected warc-fields block"),
        }
    }

    #[test]
    fn dispatches_http_block_by_content_type() {
        let mut b = RecordBuilder::new(RecordType::Response, Version::V1_1, opts());
        b.add("WARC-Date", "2017-03-06T04:03:53Z");
        b.set("Content-Type", "application/http;msgtype=response");
        b.write(b"HTTP/1.1 200 OK\r\n\r\nbody").unwrap();
        let (mut record, _) = b.build().unwrap();
        match record.block() {
            Block::Http(_) => {}
            _ => panic!("expected http block"),
        }
    }

    #[test]
    fn fixes_content_length_mismatch_when_allowed() {
        let mut options = opts();
        options.validation.fix_content_length = true;
        let mut b = RecordBuilder::new(RecordType::Resource, Version::V1_1, options);
        b.add("WARC-Date", "2017-03-06T04:03:53Z");
        b.set("Content-Type", "application/octet-stream");
        b.set("Content-Length", "999");
        b.write(b"hello").unwrap();
        let (record, validation) = b.build().unwrap();
        assert!(validation.valid());
        assert_eq!(record.header().get("Content-Length"), Some("5"));
    }

    #[test]
    fn reports_content_length_mismatch_when_not_fixing() {
        let options = opts();
        let mut b = RecordBuilder::new(RecordType::Resource, Version::V1_1, options);
        b.add("WARC-Date", "2017-03-06T04:03:53Z");
        b.set("Content-Length", "999");
        b.write(b"hello").unwrap();
        let (_, validation) = b.build().unwrap();
        assert!(!validation.valid());
    }
}
