// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Single-column attribute encoding
//!
//! An attribute map is stored as `key,value,key,value,...` where every key
//! and value is escaped first: `%` becomes `%25` and `,` becomes `%2C`.
//! The empty map encodes to the empty string.

use crate::error::{CoreError, Result};
use crate::model::Attributes;

const SEPARATOR: char = ',';

/// Encodes an attribute map into its stored form. Entries are written in
/// key order so the output is deterministic.
pub fn encode_attributes(attributes: &Attributes) -> String {
    let mut out = String::new();
    for (key, value) in attributes {
        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        escape_into(key, &mut out);
        out.push(SEPARATOR);
        escape_into(value, &mut out);
    }
    out
}

/// Decodes a stored attribute column.
pub fn decode_attributes(encoded: &str) -> Result<Attributes> {
    let mut attributes = Attributes::new();
    if encoded.is_empty() {
        return Ok(attributes);
    }

    let parts: Vec<&str> = encoded.split(SEPARATOR).collect();
    if parts.len() % 2 != 0 {
        return Err(CoreError::InvalidEncoding(format!(
            "odd number of components ({})",
            parts.len()
        )));
    }

    for pair in parts.chunks_exact(2) {
        attributes.insert(unescape(pair[0])?, unescape(pair[1])?);
    }
    Ok(attributes)
}

fn escape_into(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ',' => out.push_str("%2C"),
            other => out.push(other),
        }
    }
}

fn unescape(escaped: &str) -> Result<String> {
    if !escaped.contains('%') {
        return Ok(escaped.to_string());
    }

    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let code = rest.get(idx + 1..idx + 3).ok_or_else(|| {
            CoreError::InvalidEncoding(format!("truncated escape in '{}'", escaped))
        })?;
        match code {
            "25" => out.push('%'),
            "2C" | "2c" => out.push(','),
            other => {
                return Err(CoreError::InvalidEncoding(format!(
                    "unknown escape '%{}'",
                    other
                )))
            }
        }
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Ok(out)
}
