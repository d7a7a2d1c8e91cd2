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

//! An ordered, case-insensitive name/value list: the in-memory shape of a
//! WARC record's header fields (§4.4).

use std::io::{self, Write};

use crate::field_def::normalize_name;

/// Ordered WARC header fields. Most fields occur once; `WARC-Concurrent-To`
/// and unknown/extension fields may repeat, so this keeps every occurrence
/// in insertion order rather than collapsing into a map.
#[derive(Debug, Clone, Default)]
pub struct WarcFields {
    entries: Vec<(String, String)>,
}

impl WarcFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new occurrence, canonicalizing the name.
    pub fn add(&mut self, name: &str, value: &str) {
        self.entries.push((normalize_name(name), value.to_string()));
    }

    /// Replace all occurrences of `name` with a single new value.
    pub fn set(&mut self, name: &str, value: &str) {
        let canonical = normalize_name(name);
        self.entries.retain(|(n, _)| n != &canonical);
        self.entries.push((canonical, value.to_string()));
    }

    pub fn delete(&mut self, name: &str) {
        let canonical = normalize_name(name);
        self.entries.retain(|(n, _)| n != &canonical);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let canonical = normalize_name(name);
        self.entries
            .iter()
            .find(|(n, _)| n == &canonical)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let canonical = normalize_name(name);
        self.entries
            .iter()
            .filter(|(n, _)| n == &canonical)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    pub fn set_int(&mut self, name: &str, value: i64) {
        self.set(name, &value.to_string());
    }

    pub fn get_int64(&self, name: &str) -> Option<i64> {
        self.get_int(name)
    }

    pub fn set_int64(&mut self, name: &str, value: i64) {
        self.set_int(name, value);
    }

    /// RFC 3339 in UTC.
    pub fn get_time(&self, name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.get(name)
            .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }

    pub fn set_time(&mut self, name: &str, value: chrono::DateTime<chrono::Utc>) {
        self.set(name, &value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    }

    /// Getter for fields whose value is a bare URI wrapped in `<...>`,
    /// returning the URI without the brackets.
    pub fn get_uri_id(&self, name: &str) -> Option<&str> {
        self.get(name).map(|v| v.trim_start_matches('<').trim_end_matches('>'))
    }

    /// Setter that wraps `value` in `<...>` if it isn't already.
    pub fn set_uri_id(&mut self, name: &str, value: &str) {
        let wrapped = if value.starts_with('<') && value.ends_with('>') {
            value.to_string()
        } else {
            format!("<{value}>")
        };
        self.set(name, &wrapped);
    }

    /// Emit `Name: Value\r\n` per entry, in insertion order.
    pub fn write<W: Write>(&self, mut sink: W) -> io::Result<()> {
        for (name, value) in &self.entries {
            write!(sink, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
