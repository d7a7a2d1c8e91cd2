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

//! The `WARC-Type` enumeration, plus a bitmask of types used by the
//! field-definition table (§4.5) to express "allowed on these record types".

use std::fmt;
use std::str::FromStr;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordTypeMask: u16 {
        const WARCINFO     = 1 << 0;
        const RESPONSE      = 1 << 1;
        const RESOURCE      = 1 << 2;
        const REQUEST       = 1 << 3;
        const METADATA      = 1 << 4;
        const REVISIT       = 1 << 5;
        const CONVERSION    = 1 << 6;
        const CONTINUATION  = 1 << 7;
        const UNKNOWN       = 1 << 8;
    }
}

impl RecordTypeMask {
    pub const ALL: RecordTypeMask = RecordTypeMask::from_bits_truncate(u16::MAX);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordType {
    Warcinfo,
    Response,
    Resource,
    Request,
    Metadata,
    Revisit,
    Conversion,
    Continuation,
    /// An unrecognized `WARC-Type` value, preserved verbatim.
    Unknown(String),
}

impl RecordType {
    pub fn mask(&self) -> RecordTypeMask {
        match self {
            RecordType::Warcinfo => RecordTypeMask::WARCINFO,
            RecordType::Response => RecordTypeMask::RESPONSE,
            RecordType::Resource => RecordTypeMask::RESOURCE,
            RecordType::Request => RecordTypeMask::REQUEST,
            RecordType::Metadata => RecordTypeMask::METADATA,
            RecordType::Revisit => RecordTypeMask::REVISIT,
            RecordType::Conversion => RecordTypeMask::CONVERSION,
            RecordType::Continuation => RecordTypeMask::CONTINUATION,
            RecordType::Unknown(_) => RecordTypeMask::UNKNOWN,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordType::Warcinfo => "warcinfo",
            RecordType::Response => "response",
            RecordType::Resource => "resource",
            RecordType::Request => "request",
            RecordType::Metadata => "metadata",
            RecordType::Revisit => "revisit",
            RecordType::Conversion => "conversion",
            RecordType::Continuation => "continuation",
            RecordType::Unknown(s) => s.as_str(),
        }
    }
}

impl FromStr for RecordType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "warcinfo" => RecordType::Warcinfo,
            "response" => RecordType::Response,
            "resource" => RecordType::Resource,
            "request" => RecordType::Request,
            "metadata" => RecordType::Metadata,
            "revisit" => RecordType::Revisit,
            "conversion" => RecordType::Conversion,
            "continuation" => RecordType::Continuation,
            _ => RecordType::Unknown(s.to_string()),
        })
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V1_0,
    V1_1,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Version::V1_0 => "WARC/1.0",
            Version::V1_1 => "WARC/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_roundtrips_its_spelling() {
        let t: RecordType = "Bespoke".parse().unwrap();
        assert_eq!(t.as_str(), "Bespoke");
        assert_eq!(t.mask(), RecordTypeMask::UNKNOWN);
    }

    #[test]
    fn known_types_are_case_insensitive() {
        assert_eq!("REVISIT".parse::<RecordType>().unwrap(), RecordType::Revisit);
    }
}
