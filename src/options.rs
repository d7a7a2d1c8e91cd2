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

//! Typed option structs for the three public entry points (§4.15, §6),
//! mirroring the `Decoder`/`DecoderConfig` split and the builder-with-setters
//! style the teacher uses for its own crawler configuration structs.

use std::path::PathBuf;
use std::sync::Arc;

use crate::digest::{Algorithm, Encoding};
use crate::error::Policy;
use crate::fields::WarcFields;
use crate::io::spill::DEFAULT_MAX_MEM_BYTES;
use crate::record_type::Version;

/// Generates a fresh `WARC-Record-ID` value (already wrapped in `<...>`).
pub type RecordIdFunc = Arc<dyn Fn() -> String + Send + Sync>;

/// Produces the `(directory, base_name)` pair for a new writer output file.
pub type FileNameGenerator = Arc<dyn Fn(u64) -> (PathBuf, String) + Send + Sync>;

/// Produces the fields of a new `warcinfo` record when a writer rotates to
/// a fresh file.
pub type WarcInfoFunc = Arc<dyn Fn() -> WarcFields + Send + Sync>;

fn default_record_id() -> String {
    format!("<urn:uuid:{}>", uuid::Uuid::new_v4())
}

/// Options shared by the unmarshaler and the record builder: validation
/// policies plus digest/buffer tuning.
#[derive(Clone)]
pub struct ValidationOptions {
    pub version: Version,
    pub syntax_error_policy: Policy,
    pub spec_violation_policy: Policy,
    pub unknown_record_type_policy: Policy,
    pub block_error_policy: Policy,
    pub fix_syntax_errors: bool,
    pub fix_warc_fields_block_errors: bool,
    pub fix_content_length: bool,
    pub fix_digest: bool,
    pub add_missing_digest: bool,
    pub default_digest_algorithm: Algorithm,
    pub default_digest_encoding: Encoding,
    pub skip_parse_block: bool,
    pub buffer_tmp_dir: PathBuf,
    pub buffer_max_mem_bytes: u64,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            version: Version::V1_1,
            syntax_error_policy: Policy::Warn,
            spec_violation_policy: Policy::Warn,
            unknown_record_type_policy: Policy::Warn,
            block_error_policy: Policy::Warn,
            fix_syntax_errors: false,
            fix_warc_fields_block_errors: false,
            fix_content_length: false,
            fix_digest: false,
            add_missing_digest: false,
            default_digest_algorithm: Algorithm::Sha1,
            default_digest_encoding: Encoding::Base32,
            skip_parse_block: false,
            buffer_tmp_dir: std::env::temp_dir(),
            buffer_max_mem_bytes: DEFAULT_MAX_MEM_BYTES,
        }
    }
}

impl ValidationOptions {
    /// All policies `ignore`, block parsing skipped: fastest, most tolerant.
    pub fn no_validation() -> Self {
        Self {
            syntax_error_policy: Policy::Ignore,
            spec_violation_policy: Policy::Ignore,
            unknown_record_type_policy: Policy::Ignore,
            block_error_policy: Policy::Ignore,
            skip_parse_block: true,
            ..Self::default()
        }
    }

    /// All policies `fail`: the first problem aborts.
    pub fn strict_validation() -> Self {
        Self {
            syntax_error_policy: Policy::Fail,
            spec_violation_policy: Policy::Fail,
            unknown_record_type_policy: Policy::Fail,
            block_error_policy: Policy::Fail,
            ..Self::default()
        }
    }

    pub fn with_version(mut self, v: Version) -> Self {
        self.version = v;
        self
    }

    pub fn with_syntax_error_policy(mut self, p: Policy) -> Self {
        self.syntax_error_policy = p;
        self
    }

    pub fn with_spec_violation_policy(mut self, p: Policy) -> Self {
        self.spec_violation_policy = p;
        self
    }

    pub fn with_unknown_record_type_policy(mut self, p: Policy) -> Self {
        self.unknown_record_type_policy = p;
        self
    }

    pub fn with_block_error_policy(mut self, p: Policy) -> Self {
        self.block_error_policy = p;
        self
    }

    pub fn with_fix_syntax_errors(mut self, v: bool) -> Self {
        self.fix_syntax_errors = v;
        self
    }

    pub fn with_fix_warc_fields_block_errors(mut self, v: bool) -> Self {
        self.fix_warc_fields_block_errors = v;
        self
    }

    pub fn with_fix_content_length(mut self, v: bool) -> Self {
        self.fix_content_length = v;
        self
    }

    pub fn with_fix_digest(mut self, v: bool) -> Self {
        self.fix_digest = v;
        self
    }

    pub fn with_add_missing_digest(mut self, v: bool) -> Self {
        self.add_missing_digest = v;
        self
    }

    pub fn with_default_digest_algorithm(mut self, alg: Algorithm) -> Self {
        self.default_digest_algorithm = alg;
        self
    }

    pub fn with_default_digest_encoding(mut self, enc: Encoding) -> Self {
        self.default_digest_encoding = enc;
        self
    }

    pub fn with_skip_parse_block(mut self, v: bool) -> Self {
        self.skip_parse_block = v;
        self
    }

    pub fn with_buffer_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.buffer_tmp_dir = dir.into();
        self
    }

    pub fn with_buffer_max_mem_bytes(mut self, n: u64) -> Self {
        self.buffer_max_mem_bytes = n;
        self
    }
}

/// [`crate::unmarshal::Unmarshaler`] options.
#[derive(Clone)]
pub struct UnmarshalOptions {
    pub validation: ValidationOptions,
}

impl Default for UnmarshalOptions {
    fn default() -> Self {
        Self { validation: ValidationOptions::default() }
    }
}

impl UnmarshalOptions {
    pub fn no_validation() -> Self {
        Self { validation: ValidationOptions::no_validation() }
    }

    pub fn strict_validation() -> Self {
        Self { validation: ValidationOptions::strict_validation() }
    }
}

/// [`crate::builder::RecordBuilder`] options.
#[derive(Clone)]
pub struct BuildOptions {
    pub validation: ValidationOptions,
    pub add_missing_record_id: bool,
    pub record_id_func: RecordIdFunc,
    pub add_missing_content_length: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            validation: ValidationOptions::default(),
            add_missing_record_id: true,
            record_id_func: Arc::new(default_record_id),
            add_missing_content_length: true,
        }
    }
}

impl BuildOptions {
    pub fn no_validation() -> Self {
        Self { validation: ValidationOptions::no_validation(), ..Self::default() }
    }

    pub fn strict_validation() -> Self {
        Self { validation: ValidationOptions::strict_validation(), ..Self::default() }
    }

    pub fn with_add_missing_record_id(mut self, v: bool) -> Self {
        self.add_missing_record_id = v;
        self
    }

    pub fn with_record_id_func(mut self, f: RecordIdFunc) -> Self {
        self.record_id_func = f;
        self
    }

    pub fn with_add_missing_content_length(mut self, v: bool) -> Self {
        self.add_missing_content_length = v;
        self
    }
}

/// [`crate::writer::WarcFileWriter`] options.
#[derive(Clone)]
pub struct WriterOptions {
    pub build: BuildOptions,
    pub compression: bool,
    pub compressed_file_suffix: String,
    pub open_file_suffix: String,
    pub max_file_size: u64,
    pub expected_compression_ratio: f64,
    pub file_name_generator: Option<FileNameGenerator>,
    pub max_concurrent_writers: usize,
    pub warcinfo_func: Option<WarcInfoFunc>,
    pub add_warc_concurrent_to_header: bool,
    pub flush: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            build: BuildOptions::default(),
            compression: true,
            compressed_file_suffix: ".gz".to_string(),
            open_file_suffix: ".open".to_string(),
            max_file_size: 1024 * 1024 * 1024,
            expected_compression_ratio: 0.5,
            file_name_generator: None,
            max_concurrent_writers: 1,
            warcinfo_func: None,
            add_warc_concurrent_to_header: false,
            flush: false,
        }
    }
}

impl WriterOptions {
    pub fn with_compression(mut self, v: bool) -> Self {
        self.compression = v;
        self
    }

    pub fn with_compressed_file_suffix(mut self, s: impl Into<String>) -> Self {
        self.compressed_file_suffix = s.into();
        self
    }

    pub fn with_open_file_suffix(mut self, s: impl Into<String>) -> Self {
        self.open_file_suffix = s.into();
        self
    }

    pub fn with_max_file_size(mut self, n: u64) -> Self {
        self.max_file_size = n;
        self
    }

    pub fn with_expected_compression_ratio(mut self, r: f64) -> Self {
        self.expected_compression_ratio = r;
        self
    }

    pub fn with_file_name_generator(mut self, f: FileNameGenerator) -> Self {
        self.file_name_generator = Some(f);
        self
    }

    pub fn with_max_concurrent_writers(mut self, n: usize) -> Self {
        self.max_concurrent_writers = n.max(1);
        self
    }

    pub fn with_warcinfo_func(mut self, f: WarcInfoFunc) -> Self {
        self.warcinfo_func = Some(f);
        self
    }

    pub fn with_add_warc_concurrent_to_header(mut self, v: bool) -> Self {
        self.add_warc_concurrent_to_header = v;
        self
    }

    pub fn with_flush(mut self, v: bool) -> Self {
        self.flush = v;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_validation_ignores_every_policy_and_skips_block_parse() {
        let opts = UnmarshalOptions::no_validation();
        assert_eq!(opts.validation.syntax_error_policy, Policy::Ignore);
        assert_eq!(opts.validation.spec_violation_policy, Policy::Ignore);
        assert!(opts.validation.skip_parse_block);
    }

    #[test]
    fn strict_validation_fails_every_policy() {
        let opts = BuildOptions::strict_validation();
        assert_eq!(opts.validation.syntax_error_policy, Policy::Fail);
        assert_eq!(opts.validation.unknown_record_type_policy, Policy::Fail);
    }

    #[test]
    fn builder_setters_chain() {
        let opts = WriterOptions::default()
            .with_compression(false)
            .with_max_file_size(42)
            .with_flush(true);
        assert!(!opts.compression);
        assert_eq!(opts.max_file_size, 42);
        assert!(opts.flush);
    }

    #[test]
    fn default_record_id_is_a_bracketed_urn_uuid() {
        let id = default_record_id();
        assert!(id.starts_with("<urn:uuid:"));
        assert!(id.ends_with('>'));
    }
}
