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

use std::fmt;

use arrow_array::RecordBatch;
use arrow_schema::{ArrowError, Schema};
use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    event::{
        format::{into_recordbatch, RecordFormat},
        Record,
    },
    utils::arrow::concat_widened,
};

/// Lifecycle of a batch between `begin` and `evict`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    #[default]
    Open,
    Flushing,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Open => write!(f, "open"),
            BatchState::Flushing => write!(f, "flushing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMetadata {
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}

impl BatchMetadata {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            row_count: 0,
            created_at,
        }
    }

    pub fn is_full(&self, batch_size: usize) -> bool {
        self.row_count >= batch_size
    }

    /// An empty batch never goes stale, there is nothing to flush.
    pub fn is_stale(&self, max_age: TimeDelta, now: DateTime<Utc>) -> bool {
        self.row_count > 0 && now.signed_duration_since(self.created_at) > max_age
    }
}

/// In-memory state of one batch: raw records not yet converted and the
/// columnar table holding everything converted so far.
#[derive(Debug)]
pub struct Batch {
    pub records: Vec<Record>,
    pub table: Option<RecordBatch>,
    pub metadata: BatchMetadata,
    pub state: BatchState,
}

impl Batch {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            records: Vec::new(),
            table: None,
            metadata: BatchMetadata::new(created_at),
            state: BatchState::Open,
        }
    }

    pub fn push(&mut self, record: Record) -> usize {
        self.records.push(record);
        self.metadata.row_count += 1;
        self.metadata.row_count
    }

    /// Moves all buffered records into the table.
    ///
    /// Nothing changes when the conversion fails, the buffer and table stay
    /// as they were so the caller can retry or inspect them.
    pub fn materialize(&mut self, format: RecordFormat) -> Result<RecordBatch, ArrowError> {
        if self.records.is_empty() {
            return Ok(self.current_table());
        }

        let chunk = into_recordbatch(&self.records, format)?;
        let table = match &self.table {
            Some(table) => concat_widened(table, &chunk)?,
            None => chunk,
        };

        self.records.clear();
        self.table = Some(table.clone());

        Ok(table)
    }

    fn current_table(&self) -> RecordBatch {
        self.table.clone().unwrap_or_else(empty_table)
    }
}

fn empty_table() -> RecordBatch {
    RecordBatch::new_empty(Schema::empty().into())
}
