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

//! An append-then-seek byte buffer that spills to a temp file once it grows
//! past an in-memory threshold.
//!
//! Grounded on `crates/file-store/src/temp.rs`'s `TempFile`, which owns a
//! `std::fs::File` under a generated path and removes it on `Drop`, logging
//! rather than panicking if the removal fails.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Bytes live in memory below this size; above it, the buffer spills to disk.
pub const DEFAULT_MAX_MEM_BYTES: u64 = 1024 * 1024;

enum Storage {
    Memory(Cursor<Vec<u8>>),
    Disk(tempfile::NamedTempFile),
}

/// An `append`-then-`seek` buffer: call [`SpillBuffer::write`] (or
/// [`SpillBuffer::read_from`]) any number of times while building content,
/// then switch to [`Read`] + [`Seek`] to consume it.
pub struct SpillBuffer {
    storage: Storage,
    max_mem_bytes: u64,
    size: u64,
    tmp_dir: std::path::PathBuf,
}

impl SpillBuffer {
    pub fn new(tmp_dir: impl Into<std::path::PathBuf>, max_mem_bytes: u64) -> Self {
        Self {
            storage: Storage::Memory(Cursor::new(Vec::new())),
            max_mem_bytes,
            size: 0,
            tmp_dir: tmp_dir.into(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(std::env::temp_dir(), DEFAULT_MAX_MEM_BYTES)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn spill_if_needed(&mut self, incoming: u64) -> io::Result<()> {
        if let Storage::Memory(cursor) = &self.storage {
            if self.size + incoming > self.max_mem_bytes {
                let mut tmp = tempfile::NamedTempFile::new_in(&self.tmp_dir)?;
                tmp.write_all(cursor.get_ref())?;
                self.storage = Storage::Disk(tmp);
                tracing::debug!(size = self.size, "spill buffer moved to disk");
            }
        }
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.spill_if_needed(data.len() as u64)?;
        match &mut self.storage {
            Storage::Memory(cursor) => cursor.write_all(data)?,
            Storage::Disk(tmp) => tmp.write_all(data)?,
        }
        self.size += data.len() as u64;
        Ok(())
    }

    pub fn write_string(&mut self, s: &str) -> io::Result<()> {
        self.write(s.as_bytes())
    }

    pub fn read_from<R: Read>(&mut self, mut reader: R) -> io::Result<u64> {
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.write(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }

    /// Rewind to the start for reading. Must be called before the buffer is
    /// used via [`Read`]/[`Seek`] for the first time.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    pub fn close(self) -> io::Result<()> {
        // Dropping `self.storage` removes the temp file, if any, via
        // `tempfile`'s own `Drop` impl.
        Ok(())
    }
}

impl Read for SpillBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.storage {
            Storage::Memory(cursor) => cursor.read(buf),
            Storage::Disk(tmp) => tmp.read(buf),
        }
    }
}

impl Seek for SpillBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.storage {
            Storage::Memory(cursor) => cursor.seek(pos),
            Storage::Disk(tmp) => tmp.seek(pos),
        }
    }
}
