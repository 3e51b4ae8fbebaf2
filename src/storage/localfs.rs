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

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use relative_path::RelativePath;
use tokio::fs;
use tracing::info;

use crate::option::validation;

use super::{
    object_storage::upload_to_store, to_object_store_path, ObjectStorage, ObjectStorageError,
    ObjectStorageProvider,
};

#[derive(Debug, Clone, clap::Args)]
#[command(
    name = "Local filesystem config",
    about = "Write parquet files to a local directory",
    help_template = "\
{about-section}
{all-args}
"
)]
pub struct FSConfig {
    #[arg(
        env = "TARGET_FS_DIR",
        value_name = "filesystem path",
        default_value = "./data",
        value_parser = validation::canonicalize_path
    )]
    pub root: PathBuf,
}

impl ObjectStorageProvider for FSConfig {
    fn name(&self) -> &'static str {
        "drive"
    }

    fn construct_client(&self) -> Result<Arc<dyn ObjectStorage>, ObjectStorageError> {
        std::fs::create_dir_all(&self.root)?;
        Ok(Arc::new(LocalFS::new(self.root.clone())?))
    }

    fn get_endpoint(&self) -> String {
        self.root.display().to_string()
    }
}

/// Object storage backed by a directory. Writes go through a temporary file
/// that is renamed into place, so readers never see a partial file.
#[derive(Debug)]
pub struct LocalFS {
    // absolute path of the data directory
    root: PathBuf,
    client: LocalFileSystem,
}

impl LocalFS {
    pub fn new(root: PathBuf) -> Result<Self, ObjectStorageError> {
        let client = LocalFileSystem::new_with_prefix(&root)?;
        Ok(Self { root, client })
    }

    pub fn path_in_root(&self, path: &RelativePath) -> PathBuf {
        path.to_path(&self.root)
    }
}

#[async_trait]
impl ObjectStorage for LocalFS {
    async fn upload(&self, path: &RelativePath, resource: Bytes) -> Result<(), ObjectStorageError> {
        let size = resource.len();
        upload_to_store(&self.client, &to_object_store_path(path), resource).await?;
        info!(
            "Wrote {size} bytes to {}",
            self.path_in_root(path).display()
        );
        Ok(())
    }

    async fn check(&self) -> Result<(), ObjectStorageError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ObjectStorageError::UnhandledError(e.into()))
    }
}
