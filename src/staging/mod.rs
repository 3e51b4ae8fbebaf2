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

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use arrow_array::RecordBatch;
use arrow_schema::ArrowError;
use chrono::{DateTime, TimeDelta, Utc};
use derive_more::{Deref, DerefMut};
use tracing::debug;

use crate::{
    event::{format::RecordFormat, BatchKey, Record},
    LOCK_EXPECT,
};

pub use batch::{Batch, BatchMetadata, BatchState};

mod batch;

/// Raw records buffered per batch before they are converted into a columnar
/// chunk. Independent of the output batch size, it only caps memory.
pub const DEFAULT_MATERIALIZE_THRESHOLD: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Batch {0} was never started")]
    UnknownBatch(BatchKey),
    #[error("Batch {key} is {state}, records can only be appended to an open batch")]
    NotOpen { key: BatchKey, state: BatchState },
    #[error("Unable to reconcile columns of batch {key}: {source}")]
    SchemaReconciliation {
        key: BatchKey,
        #[source]
        source: ArrowError,
    },
}

impl BatchError {
    pub fn key(&self) -> &BatchKey {
        match self {
            BatchError::UnknownBatch(key)
            | BatchError::NotOpen { key, .. }
            | BatchError::SchemaReconciliation { key, .. } => key,
        }
    }
}

pub type BatchRef = Arc<Mutex<Batch>>;

#[derive(Deref, DerefMut, Default)]
struct Batches(RwLock<HashMap<BatchKey, BatchRef>>);

/// Keyed store of in-flight batches.
///
/// The map lock is only taken to find, insert or remove a batch; every batch
/// carries its own mutex so work on one key never waits on another.
pub struct Accumulator {
    batches: Batches,
    format: RecordFormat,
    materialize_threshold: usize,
}

impl Accumulator {
    pub fn new(format: RecordFormat) -> Self {
        Self {
            batches: Batches::default(),
            format,
            materialize_threshold: DEFAULT_MATERIALIZE_THRESHOLD,
        }
    }

    pub fn with_materialize_threshold(mut self, threshold: usize) -> Self {
        self.materialize_threshold = threshold;
        self
    }

    fn get(&self, key: &BatchKey) -> Result<BatchRef, BatchError> {
        self.batches
            .read()
            .expect(LOCK_EXPECT)
            .get(key)
            .cloned()
            .ok_or_else(|| BatchError::UnknownBatch(key.clone()))
    }

    /// Starts a batch for `key`, returns `false` if one was already started.
    pub fn begin(&self, key: &BatchKey) -> bool {
        self.begin_at(key, Utc::now())
    }

    pub fn begin_at(&self, key: &BatchKey, created_at: DateTime<Utc>) -> bool {
        let mut batches = self.batches.write().expect(LOCK_EXPECT);
        if batches.contains_key(key) {
            return false;
        }

        debug!("Starting batch {key}");
        batches.insert(key.clone(), Arc::new(Mutex::new(Batch::new(created_at))));
        true
    }

    /// Buffers `record` and returns the number of rows the batch now holds.
    pub fn append(&self, key: &BatchKey, record: Record) -> Result<usize, BatchError> {
        self.with_batch(key, |batch| match batch.state {
            BatchState::Open => Ok(batch.push(record)),
            state => Err(BatchError::NotOpen {
                key: key.clone(),
                state,
            }),
        })?
    }

    fn with_batch<T>(&self, key: &BatchKey, f: impl FnOnce(&mut Batch) -> T) -> Result<T, BatchError> {
        let batch = self.get(key)?;
        let mut batch = batch.lock().expect(LOCK_EXPECT);
        Ok(f(&mut batch))
    }

    pub fn should_materialize(&self, key: &BatchKey) -> bool {
        self.with_batch(key, |batch| batch.records.len() > self.materialize_threshold)
            .unwrap_or(false)
    }

    /// Converts the buffered records of `key` and merges them into its
    /// table, returning the merged table.
    pub fn materialize(&self, key: &BatchKey) -> Result<RecordBatch, BatchError> {
        self.with_batch(key, |batch| self.materialize_locked(key, batch))?
    }

    fn materialize_locked(&self, key: &BatchKey, batch: &mut Batch) -> Result<RecordBatch, BatchError> {
        let buffered = batch.records.len();
        let table = batch
            .materialize(self.format)
            .map_err(|source| BatchError::SchemaReconciliation {
                key: key.clone(),
                source,
            })?;
        if buffered > 0 {
            debug!(
                "Materialized {buffered} records of batch {key}, table holds {} rows",
                table.num_rows()
            );
        }

        Ok(table)
    }

    /// Marks the batch as flushing and returns its complete table.
    ///
    /// The batch keeps all its state, it is dropped only by [`Self::evict`].
    /// A batch that is already flushing can be prepared again to retry.
    pub fn prepare_flush(&self, key: &BatchKey) -> Result<(RecordBatch, BatchMetadata), BatchError> {
        self.with_batch(key, |batch| -> Result<_, BatchError> {
            batch.state = BatchState::Flushing;
            let table = self.materialize_locked(key, batch)?;
            Ok((table, batch.metadata))
        })?
    }

    pub fn mark_flushing(&self, key: &BatchKey) -> Result<(), BatchError> {
        self.with_batch(key, |batch| batch.state = BatchState::Flushing)
    }

    /// Drops everything held for `key`. Returns `false` when nothing was held.
    pub fn evict(&self, key: &BatchKey) -> bool {
        let removed = self.batches.write().expect(LOCK_EXPECT).remove(key).is_some();
        if removed {
            debug!("Evicted batch {key}");
        }
        removed
    }

    pub fn metadata(&self, key: &BatchKey) -> Option<BatchMetadata> {
        self.with_batch(key, |batch| batch.metadata).ok()
    }

    pub fn state(&self, key: &BatchKey) -> Option<BatchState> {
        self.with_batch(key, |batch| batch.state).ok()
    }

    pub fn is_full(&self, key: &BatchKey, batch_size: usize) -> bool {
        self.metadata(key)
            .is_some_and(|metadata| metadata.is_full(batch_size))
    }

    pub fn is_stale(&self, key: &BatchKey, max_age: TimeDelta, now: DateTime<Utc>) -> bool {
        self.metadata(key)
            .is_some_and(|metadata| metadata.is_stale(max_age, now))
    }

    /// Open batches older than `max_age`, in key order.
    pub fn stale_keys(&self, max_age: TimeDelta, now: DateTime<Utc>) -> Vec<BatchKey> {
        let batches = self.batches.read().expect(LOCK_EXPECT);
        let mut keys: Vec<BatchKey> = batches
            .iter()
            .filter(|(_, batch)| {
                let batch = batch.lock().expect(LOCK_EXPECT);
                batch.state == BatchState::Open && batch.metadata.is_stale(max_age, now)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Every batch currently held, in key order.
    pub fn keys(&self) -> Vec<BatchKey> {
        let mut keys: Vec<BatchKey> = self
            .batches
            .read()
            .expect(LOCK_EXPECT)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.batches.read().expect(LOCK_EXPECT).is_empty()
    }
}
