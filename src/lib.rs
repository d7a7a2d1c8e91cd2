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

//! A streaming codec for WARC (ISO 28500) web archive files: parse records
//! from a byte stream ([`unmarshal`]), build and serialize them
//! ([`builder`], [`marshal`]), and read or write whole `.warc`/`.warc.gz`
//! files on disk ([`reader`], [`writer`]).
//!
//! ```no_run
//! use warc::options::UnmarshalOptions;
//! use warc::reader::WarcFileReader;
//!
//! # fn main() -> warc::error::Result<()> {
//! let mut reader = WarcFileReader::open("crawl-0001.warc.gz", UnmarshalOptions::default())?;
//! while let Some((mut record, validation, offset)) = reader.read_next()? {
//!     if !validation.valid() {
//!         eprintln!("record at {offset}: {validation}");
//!     }
//!     println!("{} {}", record.record_type(), record.header().get("WARC-Target-URI").unwrap_or(""));
//! }
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod builder;
pub mod digest;
pub mod error;
pub mod field_def;
pub mod fields;
mod fields_parser;
pub mod io;
pub mod marshal;
pub mod options;
pub mod reader;
pub mod record;
pub mod record_type;
pub mod unmarshal;
pub mod writer;

pub use block::Block;
pub use builder::RecordBuilder;
pub use digest::{Algorithm, Encoding};
pub use error::{Error, Result};
pub use marshal::marshal_record;
pub use reader::WarcFileReader;
pub use record::{Record, RevisitProfile, RevisitRef};
pub use record_type::{RecordType, Version};
pub use unmarshal::Unmarshaler;
pub use writer::WarcFileWriter;
