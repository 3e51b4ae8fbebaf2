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

use std::{fmt::Debug, sync::Arc, time::Instant};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{path::Path, ObjectStore};
use relative_path::RelativePath;
use tracing::{debug, error};

use super::{ObjectStorageError, MIN_MULTIPART_UPLOAD_SIZE};

pub trait ObjectStorageProvider: std::fmt::Debug + Send + Sync {
    fn construct_client(&self) -> Result<Arc<dyn ObjectStorage>, ObjectStorageError>;
    fn get_endpoint(&self) -> String;
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait ObjectStorage: Debug + Send + Sync + 'static {
    /// Writes `resource` as one object at `path`.
    ///
    /// The object only becomes visible once every byte is written, a failed
    /// upload leaves nothing behind at `path`.
    async fn upload(&self, path: &RelativePath, resource: Bytes) -> Result<(), ObjectStorageError>;
    async fn check(&self) -> Result<(), ObjectStorageError>;
}

/// Puts `data` at `location`, switching to a multipart upload for large
/// payloads.
pub async fn upload_to_store(
    client: &dyn ObjectStore,
    location: &Path,
    data: Bytes,
) -> Result<(), ObjectStorageError> {
    upload_in_parts(client, location, data, MIN_MULTIPART_UPLOAD_SIZE).await
}

pub(crate) async fn upload_in_parts(
    client: &dyn ObjectStore,
    location: &Path,
    data: Bytes,
    part_size: usize,
) -> Result<(), ObjectStorageError> {
    let instant = Instant::now();
    let total_size = data.len();

    if total_size < part_size {
        client.put(location, data.into()).await?;
        debug!(
            "Uploaded {total_size} bytes to {location} in {:?}",
            instant.elapsed()
        );
        return Ok(());
    }

    let mut async_writer = client.put_multipart(location).await?;
    let result = async {
        for start_pos in (0..total_size).step_by(part_size) {
            let end_pos = (start_pos + part_size).min(total_size);
            async_writer
                .put_part(data.slice(start_pos..end_pos).into())
                .await?;
        }
        async_writer.complete().await
    }
    .await;

    if let Err(err) = result {
        if let Err(abort_err) = async_writer.abort().await {
            error!("Failed to abort multipart upload to {location}: {abort_err:?}");
        }
        return Err(err.into());
    }

    debug!(
        "Uploaded {total_size} bytes to {location} in parts of {part_size} in {:?}",
        instant.elapsed()
    );
    Ok(())
}
