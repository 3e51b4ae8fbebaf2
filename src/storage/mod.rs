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

use object_store::path::Path;
use relative_path::RelativePath;

mod localfs;
pub mod object_storage;
mod s3;

pub use localfs::{FSConfig, LocalFS};
pub use object_storage::{upload_to_store, ObjectStorage, ObjectStorageProvider};
pub use s3::{S3Config, S3};

// max concurrent request allowed against the object store
const MAX_OBJECT_STORE_REQUESTS: usize = 1000;

const CONNECT_TIMEOUT_SECS: u64 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Payloads of this size or larger are sent as multipart uploads, in parts
/// of this size.
pub const MIN_MULTIPART_UPLOAD_SIZE: usize = 25 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ObjectStorageError {
    // no such key inside the object storage
    #[error("{0} not found")]
    NoSuchKey(String),

    // storage settings that cannot be used to build a client
    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    // Could not connect to object storage
    #[error("Connection Error: {0}")]
    ConnectionError(Box<dyn std::error::Error + Send + Sync + 'static>),

    // IO Error when preparing the local store
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unhandled Error: {0}")]
    UnhandledError(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<object_store::Error> for ObjectStorageError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::Generic { source, .. } => {
                ObjectStorageError::UnhandledError(source)
            }
            object_store::Error::NotFound { path, .. } => ObjectStorageError::NoSuchKey(path),
            object_store::Error::UnknownConfigurationKey { key, .. } => {
                ObjectStorageError::InvalidConfig(format!("unknown key {key}"))
            }
            err => ObjectStorageError::UnhandledError(Box::new(err)),
        }
    }
}

pub fn to_object_store_path(path: &RelativePath) -> Path {
    Path::from(path.as_str())
}
