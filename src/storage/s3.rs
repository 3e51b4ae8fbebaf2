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

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    aws::{AmazonS3, AmazonS3Builder, AmazonS3ConfigKey, Checksum},
    limit::LimitStore,
    path::Path as StorePath,
    BackoffConfig, ClientOptions, ObjectStore, RetryConfig,
};
use relative_path::RelativePath;
use tracing::info;

use super::{
    object_storage::upload_to_store, to_object_store_path, ObjectStorage, ObjectStorageError,
    ObjectStorageProvider, CONNECT_TIMEOUT_SECS, MAX_OBJECT_STORE_REQUESTS, REQUEST_TIMEOUT_SECS,
};

const AWS_CONTAINER_CREDENTIALS_RELATIVE_URI: &str = "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI";

#[derive(Debug, Clone, Default, clap::Args)]
#[command(
    name = "S3 config",
    about = "Write parquet files to S3 or compatible object storage",
    help_template = "\
{about-section}
{all-args}
"
)]
pub struct S3Config {
    /// The endpoint to AWS S3 or compatible object storage platform
    #[arg(long, env = "S3_ENDPOINT_URL", value_name = "url")]
    pub endpoint_url: Option<String>,

    /// The access key for AWS S3 or compatible object storage platform
    #[arg(long, env = "AWS_ACCESS_KEY_ID", value_name = "access-key")]
    pub access_key_id: Option<String>,

    /// The secret key for AWS S3 or compatible object storage platform
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", value_name = "secret-key")]
    pub secret_key: Option<String>,

    /// The region for AWS S3 or compatible object storage platform
    #[arg(
        long,
        env = "AWS_REGION",
        value_name = "region",
        default_value = "us-east-1"
    )]
    pub region: String,

    /// The bucket to write to. When absent the first segment of
    /// `--filepath` names the bucket
    #[arg(long = "bucket", env = "S3_BUCKET", value_name = "bucket-name")]
    pub bucket_name: Option<String>,

    /// Set client to send checksum header on every put request
    #[arg(
        long,
        env = "S3_CHECKSUM",
        value_name = "bool",
        default_value = "false"
    )]
    pub set_checksum: bool,

    /// Set client to use path style access instead of virtual hosted style
    #[arg(
        long = "path-style",
        env = "S3_PATH_STYLE",
        value_name = "bool",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub use_path_style: bool,

    /// Set client to skip tls verification
    #[arg(
        long,
        env = "S3_TLS_SKIP_VERIFY",
        value_name = "bool",
        default_value = "false"
    )]
    pub skip_tls: bool,
}

impl S3Config {
    fn endpoint(&self) -> Result<&str, ObjectStorageError> {
        self.endpoint_url
            .as_deref()
            .ok_or_else(|| ObjectStorageError::InvalidConfig("s3_endpoint_url is required".into()))
    }

    fn bucket(&self) -> Result<&str, ObjectStorageError> {
        self.bucket_name
            .as_deref()
            .ok_or_else(|| ObjectStorageError::InvalidConfig("no bucket configured".into()))
    }

    fn get_default_builder(&self) -> Result<AmazonS3Builder, ObjectStorageError> {
        let mut client_options = ClientOptions::default()
            .with_allow_http(true)
            .with_connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));

        if self.skip_tls {
            client_options = client_options.with_allow_invalid_certificates(true)
        }
        let retry_config = RetryConfig {
            max_retries: 5,
            retry_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
        };

        let mut builder = AmazonS3Builder::new()
            .with_region(&self.region)
            .with_endpoint(self.endpoint()?)
            .with_bucket_name(self.bucket()?)
            .with_virtual_hosted_style_request(!self.use_path_style)
            .with_allow_http(true)
            .with_retry(retry_config);

        if self.set_checksum {
            builder = builder.with_checksum_algorithm(Checksum::SHA256)
        }

        if let Some((access_key, secret_key)) =
            self.access_key_id.as_ref().zip(self.secret_key.as_ref())
        {
            builder = builder
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key);
        }

        if let Ok(relative_uri) = std::env::var(AWS_CONTAINER_CREDENTIALS_RELATIVE_URI) {
            builder = builder.with_config(
                AmazonS3ConfigKey::ContainerCredentialsRelativeUri,
                relative_uri,
            );
        }

        Ok(builder.with_client_options(client_options))
    }
}

impl ObjectStorageProvider for S3Config {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn construct_client(&self) -> Result<Arc<dyn ObjectStorage>, ObjectStorageError> {
        let s3 = self.get_default_builder()?.build()?;

        // limit objectstore to a concurrent request limit
        let s3 = LimitStore::new(s3, MAX_OBJECT_STORE_REQUESTS);

        Ok(Arc::new(S3 {
            client: s3,
            bucket: self.bucket()?.to_owned(),
            root: StorePath::from(""),
        }))
    }

    fn get_endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint_url.as_deref().unwrap_or_default(),
            self.bucket_name.as_deref().unwrap_or_default()
        )
    }
}

#[derive(Debug)]
pub struct S3 {
    client: LimitStore<AmazonS3>,
    bucket: String,
    root: StorePath,
}

#[async_trait]
impl ObjectStorage for S3 {
    async fn upload(&self, path: &RelativePath, resource: Bytes) -> Result<(), ObjectStorageError> {
        let size = resource.len();
        upload_to_store(&self.client, &to_object_store_path(path), resource).await?;
        info!("Uploaded {size} bytes to s3://{}/{path}", self.bucket);
        Ok(())
    }

    async fn check(&self) -> Result<(), ObjectStorageError> {
        self.client
            .list_with_delimiter(Some(&self.root))
            .await
            .map(|_| ())
            .map_err(|err| ObjectStorageError::ConnectionError(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            endpoint_url: Some("http://localhost:9000".to_owned()),
            access_key_id: Some("minio".to_owned()),
            secret_key: Some("minio123".to_owned()),
            region: "us-east-1".to_owned(),
            bucket_name: Some("warehouse".to_owned()),
            use_path_style: true,
            ..Default::default()
        }
    }

    #[test]
    fn builds_client_without_network() {
        let config = config();

        assert!(config.construct_client().is_ok());
        assert_eq!(config.get_endpoint(), "http://localhost:9000/warehouse");
    }

    #[test]
    fn missing_endpoint_is_invalid_config() {
        let config = S3Config {
            endpoint_url: None,
            ..config()
        };

        assert!(matches!(
            config.construct_client(),
            Err(ObjectStorageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn missing_bucket_is_invalid_config() {
        let config = S3Config {
            bucket_name: None,
            ..config()
        };

        assert!(matches!(
            config.construct_client(),
            Err(ObjectStorageError::InvalidConfig(_))
        ));
    }
}
