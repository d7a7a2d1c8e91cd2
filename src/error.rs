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

//! Tagged errors and the policy-driven validation collector.
//!
//! Every call site that can detect a recoverable problem reports it through
//! a [`Policy`], which decides whether the problem is ignored, recorded into
//! a [`ValidationCollector`], or turned into a hard [`Error`].

use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("compressed stream is corrupt: {0}")]
    CompressionCorrupt(String),

    #[error("syntax error at line {line}: {message}")]
    SyntaxError {
        line: u64,
        message: String,
        #[source]
        cause: Option<Box<Error>>,
    },

    #[error("header field '{field}': {message}")]
    HeaderFieldError { field: String, message: String },

    #[error("{kind} digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch {
        kind: DigestKind,
        expected: String,
        computed: String,
    },

    #[error("Content-Length mismatch: header says {expected}, observed {computed}")]
    ContentLengthMismatch { expected: u64, computed: u64 },

    #[error("unknown revisit profile: {0}")]
    UnknownRevisitProfile(String),

    #[error("revisit record is missing a payload digest to reference")]
    RevisitMissingPayloadDigest,

    #[error("merge is only legal on a revisit record")]
    MergeOnNonRevisit,

    #[error("merging segmented records is not implemented")]
    SegmentedMergeUnsupported,

    #[error("block content was already read and is not cached")]
    ContentReAccessed,

    #[error("unknown WARC-Type: {0}")]
    UnknownRecordType(String),

    #[error("writer is closed")]
    WriterClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Block,
    Payload,
}

impl fmt::Display for DigestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestKind::Block => write!(f, "block"),
            DigestKind::Payload => write!(f, "payload"),
        }
    }
}

/// How a recoverable problem should be handled at the point it's detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Silently proceed; the problem leaves no trace beyond a `tracing` event.
    Ignore,
    /// Proceed, but record the problem in the caller's [`ValidationCollector`].
    #[default]
    Warn,
    /// Abort and return the error.
    Fail,
}

impl Policy {
    /// Apply the policy to a lazily-constructed error.
    ///
    /// Returns `Ok(())` when the caller should continue, or `Err` when
    /// `self` is [`Policy::Fail`].
    pub fn apply(self, validation: &mut ValidationCollector, make_err: impl FnOnce() -> Error) -> Result<()> {
        match self {
            Policy::Ignore => {
                tracing::debug!("ignoring validation problem (policy=ignore)");
                Ok(())
            }
            Policy::Warn => {
                let err = make_err();
                tracing::warn!(%err, "validation problem");
                validation.push(err);
                Ok(())
            }
            Policy::Fail => Err(make_err()),
        }
    }
}

/// Accumulates non-fatal problems detected while reading or building a record.
#[derive(Debug, Default)]
pub struct ValidationCollector {
    errors: Vec<Error>,
}

impl ValidationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    pub fn extend(&mut self, other: ValidationCollector) {
        self.errors.extend(other.errors);
    }
}

impl fmt::Display for ValidationCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            writeln!(f, "{}: {}", i + 1, err)?;
        }
        Ok(())
    }
}

impl IntoIterator for ValidationCollector {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}
