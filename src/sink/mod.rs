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

use std::{sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::errors::ParquetError;
use relative_path::RelativePathBuf;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    cli::{ConfigError, Options},
    event::{BatchKey, Record},
    staging::{Accumulator, BatchError},
    storage::{ObjectStorage, ObjectStorageError},
};

use self::naming::FileNamer;

pub mod naming;
pub mod serialize;

/// Longest wait between two upload attempts, unless the first wait is longer.
const MAX_UPLOAD_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(
        "Unable to prepare batch {} of stream {} for {path}: {source}",
        key.batch_id,
        key.stream_name
    )]
    Materialize {
        key: BatchKey,
        path: RelativePathBuf,
        #[source]
        source: BatchError,
    },
    #[error(
        "Unable to serialize batch {} of stream {} for {path}: {source}",
        key.batch_id,
        key.stream_name
    )]
    Serialization {
        key: BatchKey,
        path: RelativePathBuf,
        #[source]
        source: ParquetError,
    },
    #[error(
        "Storage unavailable, batch {} of stream {} was not written to {path} after {attempts} attempts: {source}",
        key.batch_id,
        key.stream_name
    )]
    StorageUnavailable {
        key: BatchKey,
        path: RelativePathBuf,
        attempts: usize,
        #[source]
        source: ObjectStorageError,
    },
}

impl FlushError {
    pub fn key(&self) -> &BatchKey {
        match self {
            FlushError::Batch(err) => err.key(),
            FlushError::Materialize { key, .. }
            | FlushError::Serialization { key, .. }
            | FlushError::StorageUnavailable { key, .. } => key,
        }
    }

    pub fn path(&self) -> Option<&RelativePathBuf> {
        match self {
            FlushError::Batch(_) => None,
            FlushError::Materialize { path, .. }
            | FlushError::Serialization { path, .. }
            | FlushError::StorageUnavailable { path, .. } => Some(path),
        }
    }
}

/// An object written by a successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub key: BatchKey,
    pub path: RelativePathBuf,
    pub rows: usize,
    pub size: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Record buffered, the batch holds this many rows
    Buffered(usize),
    /// Record buffered, then the batch went past its max age and was flushed.
    /// A fresh batch was started under the same key.
    RolledOver(Option<UploadedFile>),
}

/// Drives batches from their first record to an uploaded parquet file.
///
/// Owns every in-flight batch through its [`Accumulator`]. Several sinks can
/// live side by side, they share nothing.
pub struct Sink {
    options: Arc<Options>,
    storage: Arc<dyn ObjectStorage>,
    accumulator: Accumulator,
    namer: FileNamer,
}

impl Sink {
    pub fn new(options: Arc<Options>, storage: Arc<dyn ObjectStorage>) -> Result<Self, ConfigError> {
        let namer = FileNamer::new(&options.filepath, &options.file_naming_scheme)
            .map_err(ConfigError::Invalid)?;
        let accumulator = Accumulator::new(options.record_format());

        Ok(Self {
            options,
            storage,
            accumulator,
            namer,
        })
    }

    /// Converts buffered records into columns every `threshold` records
    /// instead of the default.
    pub fn with_materialize_threshold(self, threshold: usize) -> Self {
        Self {
            accumulator: self.accumulator.with_materialize_threshold(threshold),
            ..self
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn on_batch_start(&self, stream: &str, batch_id: &str) -> bool {
        self.accumulator.begin(&BatchKey::new(stream, batch_id))
    }

    pub async fn on_record(
        &self,
        stream: &str,
        batch_id: &str,
        record: Record,
    ) -> Result<RecordOutcome, FlushError> {
        self.on_record_at(stream, batch_id, record, Utc::now()).await
    }

    /// Buffers `record`, converting the buffer into columns when it grows
    /// past the chunk threshold, and flushes the batch if it is older than
    /// the max record age at `now`.
    pub async fn on_record_at(
        &self,
        stream: &str,
        batch_id: &str,
        record: Record,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, FlushError> {
        let key = BatchKey::new(stream, batch_id);
        let rows = self.accumulator.append(&key, record)?;

        if self.accumulator.should_materialize(&key) {
            self.accumulator.materialize(&key)?;
        }

        if self
            .accumulator
            .is_stale(&key, self.options.max_record_age(), now)
        {
            info!(
                "Batch {batch_id} of stream {stream} is older than {} minutes, flushing {rows} rows",
                self.options.max_record_age_in_minutes
            );
            let uploaded = self.flush_at(&key, now).await?;
            self.accumulator.begin_at(&key, now);
            return Ok(RecordOutcome::RolledOver(uploaded));
        }

        Ok(RecordOutcome::Buffered(rows))
    }

    pub async fn on_batch_complete(
        &self,
        stream: &str,
        batch_id: &str,
    ) -> Result<Option<UploadedFile>, FlushError> {
        self.flush(&BatchKey::new(stream, batch_id)).await
    }

    pub fn is_full(&self, stream: &str, batch_id: &str) -> bool {
        self.accumulator
            .is_full(&BatchKey::new(stream, batch_id), self.options.batch_size)
    }

    pub async fn flush(&self, key: &BatchKey) -> Result<Option<UploadedFile>, FlushError> {
        self.flush_at(key, Utc::now()).await
    }

    /// Materializes, serializes and uploads the batch, then drops it.
    ///
    /// On failure the batch stays in memory in the flushing state and a later
    /// call retries it. A batch without rows is dropped without writing a
    /// file.
    pub async fn flush_at(
        &self,
        key: &BatchKey,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadedFile>, FlushError> {
        let metadata = self
            .accumulator
            .metadata(key)
            .ok_or_else(|| BatchError::UnknownBatch(key.clone()))?;
        if metadata.row_count == 0 {
            debug!("Batch {key} has no rows, nothing to upload");
            self.accumulator.evict(key);
            return Ok(None);
        }

        let path = self.namer.path_for(key, now);
        let (table, metadata) =
            self.accumulator
                .prepare_flush(key)
                .map_err(|source| FlushError::Materialize {
                    key: key.clone(),
                    path: path.clone(),
                    source,
                })?;

        let props = serialize::writer_props(&self.options);
        let bytes = serialize::to_parquet_bytes(&table, props).map_err(|source| {
            FlushError::Serialization {
                key: key.clone(),
                path: path.clone(),
                source,
            }
        })?;
        let size = bytes.len();

        self.upload_with_retry(key, &path, bytes).await?;
        self.accumulator.evict(key);

        info!(
            "Flushed batch {} of stream {} to {path}: {} rows, {size} bytes",
            key.batch_id, key.stream_name, metadata.row_count
        );

        Ok(Some(UploadedFile {
            key: key.clone(),
            path,
            rows: metadata.row_count,
            size,
        }))
    }

    async fn upload_with_retry(
        &self,
        key: &BatchKey,
        path: &RelativePathBuf,
        bytes: Bytes,
    ) -> Result<(), FlushError> {
        let attempts = self.options.upload_retries.max(1);
        let backoff = self.options.upload_backoff();
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(backoff)
            .with_max_delay(backoff.max(MAX_UPLOAD_BACKOFF))
            .with_max_times(attempts - 1);
        let upload_fn = || self.storage.upload(path, bytes.clone());

        upload_fn
            .retry(retry_policy)
            .sleep(sleep)
            .notify(|err, dur| {
                warn!(
                    "Upload of batch {} of stream {} to {path} failed, retrying in {dur:?}: {err}",
                    key.batch_id, key.stream_name
                );
            })
            .await
            .map_err(|source| FlushError::StorageUnavailable {
                key: key.clone(),
                path: path.clone(),
                attempts,
                source,
            })
    }

    pub async fn flush_stale(&self) -> Vec<Result<UploadedFile, FlushError>> {
        self.flush_stale_at(Utc::now()).await
    }

    /// Flushes every open batch older than the max record age at `now` and
    /// starts a fresh batch under each flushed key.
    pub async fn flush_stale_at(&self, now: DateTime<Utc>) -> Vec<Result<UploadedFile, FlushError>> {
        let mut results = Vec::new();
        for key in self
            .accumulator
            .stale_keys(self.options.max_record_age(), now)
        {
            match self.flush_at(&key, now).await {
                Ok(uploaded) => {
                    self.accumulator.begin_at(&key, now);
                    results.extend(uploaded.map(Ok));
                }
                Err(err) => results.push(Err(err)),
            }
        }
        results
    }

    /// Flushes every batch still held, including ones left behind by a
    /// failed flush.
    pub async fn flush_all(&self) -> Vec<Result<UploadedFile, FlushError>> {
        let mut results = Vec::new();
        for key in self.accumulator.keys() {
            match self.flush(&key).await {
                Ok(uploaded) => results.extend(uploaded.map(Ok)),
                Err(err) => results.push(Err(err)),
            }
        }
        results
    }
}
