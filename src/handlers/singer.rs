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

//! Singer input: newline delimited JSON messages on stdin, STATE echoed on
//! stdout once everything before it is durably written.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    select,
    time::Duration,
};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::{
    event::Record,
    option::FlushFailurePolicy,
    sink::{FlushError, RecordOutcome, Sink, UploadedFile},
    sync::{monitor_task_duration, sweep_ticker},
};

const FLUSH_WARN_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Schema {
        stream: String,
        schema: Value,
        #[serde(default)]
        key_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: Record,
        #[serde(default)]
        time_extracted: Option<String>,
    },
    State {
        value: Value,
    },
    ActivateVersion {
        stream: String,
        version: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unable to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed message on line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Flush(#[from] FlushError),
    #[error("{0} batches could not be written, state was not emitted")]
    Unflushed(usize),
}

/// Turns Singer messages into calls on a [`Sink`].
///
/// Every stream has one current batch, named by a ULID. A batch is completed
/// once it holds `batch_size` rows, the next record of the stream opens a new
/// one.
pub struct Dispatcher<'a> {
    sink: &'a Sink,
    policy: FlushFailurePolicy,
    // current batch id per stream
    batches: HashMap<String, String>,
    schemas: HashSet<String>,
    state: Option<Value>,
    uploaded: Vec<UploadedFile>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(sink: &'a Sink) -> Self {
        Self {
            sink,
            policy: sink.options().flush_failure_policy,
            batches: HashMap::new(),
            schemas: HashSet::new(),
            state: None,
            uploaded: Vec::new(),
        }
    }

    pub fn uploaded(&self) -> &[UploadedFile] {
        &self.uploaded
    }

    /// Reads messages until `input` ends, sweeping aged batches in between,
    /// then flushes whatever is left and writes the last STATE to `output`.
    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> Result<(), DispatchError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut ticker = sweep_ticker(self.sink.options().sweep_interval());
        let mut line_number = 0;

        loop {
            select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    line_number += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let message = serde_json::from_str(&line).map_err(|source| {
                        DispatchError::Decode { line: line_number, source }
                    })?;
                    self.handle(message).await?;
                }
                _ = ticker.tick() => {
                    self.sweep().await?;
                }
            }
        }

        self.finish(output).await
    }

    pub async fn handle(&mut self, message: Message) -> Result<(), DispatchError> {
        match message {
            Message::Schema {
                stream,
                key_properties,
                ..
            } => {
                debug!("Schema for stream {stream}, key properties {key_properties:?}");
                self.schemas.insert(stream);
            }
            Message::Record { stream, record, .. } => self.on_record(stream, record).await?,
            Message::State { value } => self.state = Some(value),
            Message::ActivateVersion { stream, version } => {
                debug!("Ignoring ACTIVATE_VERSION {version} for stream {stream}");
            }
        }

        Ok(())
    }

    async fn on_record(&mut self, stream: String, record: Record) -> Result<(), DispatchError> {
        if !self.schemas.contains(&stream) {
            warn!("Record for stream {stream} arrived before its SCHEMA message");
            self.schemas.insert(stream.clone());
        }

        let batch_id = match self.batches.get(&stream) {
            Some(batch_id) => batch_id.clone(),
            None => {
                let batch_id = Ulid::new().to_string();
                self.sink.on_batch_start(&stream, &batch_id);
                self.batches.insert(stream.clone(), batch_id.clone());
                batch_id
            }
        };

        match self.sink.on_record(&stream, &batch_id, record).await {
            Ok(RecordOutcome::Buffered(_)) => {}
            Ok(RecordOutcome::RolledOver(uploaded)) => self.uploaded.extend(uploaded),
            Err(err) => return self.on_flush_error(err),
        }

        if self.sink.is_full(&stream, &batch_id) {
            self.batches.remove(&stream);
            let result = monitor_task_duration(
                "on_batch_complete",
                FLUSH_WARN_THRESHOLD,
                self.sink.on_batch_complete(&stream, &batch_id),
            )
            .await;
            match result {
                Ok(uploaded) => self.uploaded.extend(uploaded),
                Err(err) => return self.on_flush_error(err),
            }
        }

        Ok(())
    }

    async fn sweep(&mut self) -> Result<(), DispatchError> {
        let results =
            monitor_task_duration("flush_stale", FLUSH_WARN_THRESHOLD, self.sink.flush_stale())
                .await;
        for result in results {
            match result {
                Ok(uploaded) => self.uploaded.push(uploaded),
                Err(err) => self.on_flush_error(err)?,
            }
        }
        Ok(())
    }

    // A failed batch stays in memory. Under best-effort its stream moves on
    // to a new batch and the failed one is retried when input ends.
    fn on_flush_error(&mut self, err: FlushError) -> Result<(), DispatchError> {
        let key = err.key().clone();
        error!(
            stream = %key.stream_name,
            batch_id = %key.batch_id,
            path = ?err.path(),
            "Flush failed: {err}"
        );

        match self.policy {
            FlushFailurePolicy::FailFast => Err(err.into()),
            FlushFailurePolicy::BestEffort => {
                if self.batches.get(&key.stream_name) == Some(&key.batch_id) {
                    self.batches.remove(&key.stream_name);
                }
                Ok(())
            }
        }
    }

    async fn finish<W>(&mut self, output: &mut W) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        self.batches.clear();
        let mut failed = 0;
        for result in self.sink.flush_all().await {
            match result {
                Ok(uploaded) => self.uploaded.push(uploaded),
                Err(err) => {
                    error!("Flush failed at end of input: {err}");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(DispatchError::Unflushed(failed));
        }

        info!("Wrote {} files", self.uploaded.len());
        if let Some(state) = self.state.take() {
            output.write_all(format!("{state}\n").as_bytes()).await?;
            output.flush().await?;
        }

        Ok(())
    }
}
