/*
 * Parseable Server (C) 2022 - 2024 Parseable, Inc.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 *
 */

pub mod format;

use std::fmt::Display;

use serde_json::{Map, Value};

/// A single semi-structured record as received from upstream.
pub type Record = Map<String, Value>;

/// Identity of one in-flight output file.
///
/// The same key may be reused once the batch it named has been uploaded and
/// evicted; the next `begin` starts an unrelated batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub stream_name: String,
    pub batch_id: String,
}

impl BatchKey {
    pub fn new(stream_name: impl Into<String>, batch_id: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            batch_id: batch_id.into(),
        }
    }
}

impl Display for BatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.stream_name, self.batch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_displays_as_stream_and_batch() {
        let key = BatchKey::new("orders", "b1");
        assert_eq!(key.to_string(), "orders-b1");
    }

    #[test]
    fn keys_with_same_parts_are_equal() {
        assert_eq!(BatchKey::new("orders", "b1"), BatchKey::new("orders", "b1"));
        assert_ne!(BatchKey::new("orders", "b1"), BatchKey::new("orders", "b2"));
    }
}
