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

use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use chrono::TimeDelta;
use clap::{parser::ValueSource, ArgMatches, Parser};
use serde::Deserialize;

use crate::{
    event::format::RecordFormat,
    option::{validation, Compression, FlushFailurePolicy},
    sink::naming,
    storage::{FSConfig, ObjectStorageProvider, S3Config},
};

pub const DEFAULT_FILEPATH: &str = "target_s3_polars/";
pub const DEFAULT_FILE_NAMING_SCHEME: &str = "{stream}-{timestamp}.{format}";
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_MAX_RECORD_AGE_IN_MINUTES: u64 = 5;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 262_144;
pub const DEFAULT_UPLOAD_RETRIES: usize = 3;
pub const DEFAULT_UPLOAD_BACKOFF_MS: u64 = 500;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

// longest span a `TimeDelta` holds
pub const MAX_RECORD_AGE_IN_MINUTES: u64 = (i64::MAX / 60_000) as u64;
pub const MAX_UPLOAD_BACKOFF_MS: u64 = 3_600_000;
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 86_400;

#[derive(Parser)]
#[command(
    name = "target-s3-parquet",
    bin_name = "target-s3-parquet",
    about = "Singer target batching records into parquet files on object storage.",
    long_about = r#"
Singer target batching records into parquet files on object storage.

Reads Singer messages from stdin and writes one parquet file per batch.

Usage:
target-s3-parquet [command] [options..]


Help:
target-s3-parquet [command] --help

"#,
    arg_required_else_help = true,
    color = clap::ColorChoice::Always,
    version = env!("CARGO_PKG_VERSION"),
    propagate_version = true,
    next_line_help = false,
    help_template = r#"{name} v{version}
{about}

{all-args}
        "#,
    subcommand_required = true,
)]
pub struct Cli {
    /// JSON config file, its values apply to options not given on the
    /// command line or through the environment
    #[arg(
        long,
        global = true,
        env = "TARGET_CONFIG",
        value_name = "file",
        value_parser = validation::file_path
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub storage: StorageOptions,
}

#[derive(Parser)]
pub enum StorageOptions {
    #[command(name = "local-store")]
    Local(LocalStoreArgs),

    #[command(name = "s3-store")]
    S3(S3StoreArgs),
}

#[derive(Parser)]
pub struct LocalStoreArgs {
    #[command(flatten)]
    pub options: Options,
    #[command(flatten)]
    pub storage: FSConfig,
}

#[derive(Parser)]
pub struct S3StoreArgs {
    #[command(flatten)]
    pub options: Options,
    #[command(flatten)]
    pub storage: S3Config,
}

#[derive(Parser, Debug, Clone)]
pub struct Options {
    #[arg(
        long,
        env = "TARGET_FILEPATH",
        default_value = DEFAULT_FILEPATH,
        help = "Prefix of every output file path"
    )]
    pub filepath: String,

    #[arg(
        long,
        env = "TARGET_FILE_NAMING_SCHEME",
        default_value = DEFAULT_FILE_NAMING_SCHEME,
        value_parser = validation::file_naming_scheme,
        help = "Output file name, placeholders: {stream} {timestamp} {format} {batch_id} {uid}"
    )]
    pub file_naming_scheme: String,

    #[arg(
        long,
        env = "TARGET_BATCH_SIZE",
        default_value_t = DEFAULT_BATCH_SIZE,
        value_parser = validation::non_zero_usize,
        help = "Number of records per output file"
    )]
    pub batch_size: usize,

    #[arg(
        long,
        env = "TARGET_RECORD_AS_JSON",
        default_value = "false",
        help = "Store every record as a single JSON text column"
    )]
    pub record_as_json: bool,

    #[arg(
        long,
        env = "TARGET_MAX_RECORD_AGE_IN_MINUTES",
        default_value_t = DEFAULT_MAX_RECORD_AGE_IN_MINUTES,
        value_parser = validation::max_record_age_in_minutes,
        help = "Flush a batch once it is older than this many minutes"
    )]
    pub max_record_age_in_minutes: u64,

    #[arg(
        long,
        env = "TARGET_COMPRESSION",
        default_value = "snappy",
        value_parser = validation::compression,
        help = "Parquet compression algorithm"
    )]
    pub compression: Compression,

    #[arg(
        long,
        env = "TARGET_ROW_GROUP_SIZE",
        default_value_t = DEFAULT_ROW_GROUP_SIZE,
        value_parser = validation::non_zero_usize,
        help = "Number of rows in a row group"
    )]
    pub row_group_size: usize,

    #[arg(
        long,
        env = "TARGET_UPLOAD_RETRIES",
        default_value_t = DEFAULT_UPLOAD_RETRIES,
        value_parser = validation::non_zero_usize,
        help = "Upload attempts before a flush fails"
    )]
    pub upload_retries: usize,

    #[arg(
        long,
        env = "TARGET_UPLOAD_BACKOFF_MS",
        default_value_t = DEFAULT_UPLOAD_BACKOFF_MS,
        value_parser = validation::upload_backoff_ms,
        help = "Wait before the first upload retry in milliseconds, doubled on each retry"
    )]
    pub upload_backoff_ms: u64,

    #[arg(
        long,
        env = "TARGET_FLUSH_FAILURE_POLICY",
        default_value = "fail-fast",
        value_parser = validation::flush_failure_policy,
        help = "fail-fast stops on the first failed flush, best-effort logs it and continues"
    )]
    pub flush_failure_policy: FlushFailurePolicy,

    #[arg(
        long,
        env = "TARGET_SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        value_parser = validation::sweep_interval_secs,
        help = "Interval in seconds between checks for batches past their max age"
    )]
    pub sweep_interval_secs: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            filepath: DEFAULT_FILEPATH.to_owned(),
            file_naming_scheme: DEFAULT_FILE_NAMING_SCHEME.to_owned(),
            batch_size: DEFAULT_BATCH_SIZE,
            record_as_json: false,
            max_record_age_in_minutes: DEFAULT_MAX_RECORD_AGE_IN_MINUTES,
            compression: Compression::default(),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            upload_retries: DEFAULT_UPLOAD_RETRIES,
            upload_backoff_ms: DEFAULT_UPLOAD_BACKOFF_MS,
            flush_failure_policy: FlushFailurePolicy::default(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl Options {
    pub fn record_format(&self) -> RecordFormat {
        RecordFormat::from_record_as_json(self.record_as_json)
    }

    /// Ages past what a `TimeDelta` holds never expire.
    pub fn max_record_age(&self) -> TimeDelta {
        i64::try_from(self.max_record_age_in_minutes)
            .ok()
            .and_then(TimeDelta::try_minutes)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn upload_backoff(&self) -> Duration {
        Duration::from_millis(self.upload_backoff_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Checks values that may have come from a config file and so skipped
    /// the command line parsers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounded = [
            ("batch_size", self.batch_size as u64, 1, u64::MAX),
            (
                "max_record_age_in_minutes",
                self.max_record_age_in_minutes,
                1,
                MAX_RECORD_AGE_IN_MINUTES,
            ),
            ("row_group_size", self.row_group_size as u64, 1, u64::MAX),
            ("upload_retries", self.upload_retries as u64, 1, u64::MAX),
            ("upload_backoff_ms", self.upload_backoff_ms, 0, MAX_UPLOAD_BACKOFF_MS),
            (
                "sweep_interval_secs",
                self.sweep_interval_secs,
                1,
                MAX_SWEEP_INTERVAL_SECS,
            ),
        ];
        if let Some((name, value, min, max)) = bounded
            .iter()
            .find(|(_, value, min, max)| !(*min..=*max).contains(value))
        {
            return Err(ConfigError::Invalid(format!(
                "{name} is {value}, expected a value from {min} to {max}"
            )));
        }

        naming::validate_template(&self.file_naming_scheme).map_err(ConfigError::Invalid)
    }
}

/// Config file in the Singer layout, keys named as in the `config.json`
/// handed to a Singer target.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub s3_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: Option<String>,
    pub bucket: Option<String>,
    pub filepath: Option<String>,
    pub file_naming_scheme: Option<String>,
    pub batch_size: Option<usize>,
    pub record_as_json: Option<bool>,
    pub max_record_age_in_minutes: Option<u64>,
    pub compression: Option<Compression>,
    pub row_group_size: Option<usize>,
    pub upload_retries: Option<usize>,
    pub upload_backoff_ms: Option<u64>,
    pub flush_failure_policy: Option<FlushFailurePolicy>,
    pub sweep_interval_secs: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings resolved once at startup, read-only afterwards.
#[derive(Debug)]
pub struct Config {
    pub options: Arc<Options>,
    pub storage: Arc<dyn ObjectStorageProvider>,
}

impl Cli {
    /// Applies the config file, if any, and resolves the storage settings.
    ///
    /// `matches` must be the matches `self` was built from, they tell which
    /// options were given explicitly.
    pub fn resolve(self, matches: &ArgMatches) -> Result<Config, ConfigError> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        let sub_matches = matches
            .subcommand()
            .map(|(_, sub_matches)| sub_matches)
            .unwrap_or(matches);

        let (mut options, storage): (Options, Arc<dyn ObjectStorageProvider>) = match self.storage {
            StorageOptions::Local(args) => {
                let mut options = args.options;
                options.apply_file(&file, sub_matches);
                (options, Arc::new(args.storage) as Arc<dyn ObjectStorageProvider>)
            }
            StorageOptions::S3(args) => {
                let mut options = args.options;
                let mut storage = args.storage;
                options.apply_file(&file, sub_matches);
                storage.apply_file(&file, sub_matches);
                if storage.bucket_name.is_none() {
                    let (bucket, prefix) = split_bucket(&options.filepath).ok_or_else(|| {
                        ConfigError::Invalid(
                            "no bucket given and filepath does not start with one".to_owned(),
                        )
                    })?;
                    storage.bucket_name = Some(bucket);
                    options.filepath = prefix;
                }
                (options, Arc::new(storage) as Arc<dyn ObjectStorageProvider>)
            }
        };

        options.filepath = options.filepath.trim_start_matches('/').to_owned();
        options.validate()?;

        Ok(Config {
            options: Arc::new(options),
            storage,
        })
    }
}

impl Options {
    fn apply_file(&mut self, file: &ConfigFile, matches: &ArgMatches) {
        fill(matches, "filepath", &mut self.filepath, file.filepath.clone());
        fill(
            matches,
            "file_naming_scheme",
            &mut self.file_naming_scheme,
            file.file_naming_scheme.clone(),
        );
        fill(matches, "batch_size", &mut self.batch_size, file.batch_size);
        fill(matches, "record_as_json", &mut self.record_as_json, file.record_as_json);
        fill(
            matches,
            "max_record_age_in_minutes",
            &mut self.max_record_age_in_minutes,
            file.max_record_age_in_minutes,
        );
        fill(matches, "compression", &mut self.compression, file.compression);
        fill(matches, "row_group_size", &mut self.row_group_size, file.row_group_size);
        fill(matches, "upload_retries", &mut self.upload_retries, file.upload_retries);
        fill(
            matches,
            "upload_backoff_ms",
            &mut self.upload_backoff_ms,
            file.upload_backoff_ms,
        );
        fill(
            matches,
            "flush_failure_policy",
            &mut self.flush_failure_policy,
            file.flush_failure_policy,
        );
        fill(
            matches,
            "sweep_interval_secs",
            &mut self.sweep_interval_secs,
            file.sweep_interval_secs,
        );
    }
}

impl S3Config {
    fn apply_file(&mut self, file: &ConfigFile, matches: &ArgMatches) {
        fill_opt(matches, "endpoint_url", &mut self.endpoint_url, &file.s3_endpoint_url);
        fill_opt(matches, "access_key_id", &mut self.access_key_id, &file.aws_access_key_id);
        fill_opt(matches, "secret_key", &mut self.secret_key, &file.aws_secret_access_key);
        fill_opt(matches, "bucket_name", &mut self.bucket_name, &file.bucket);
        fill(matches, "region", &mut self.region, file.aws_region.clone());
    }
}

fn given_explicitly(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine | ValueSource::EnvVariable)
    )
}

// file values only replace defaults
fn fill<T>(matches: &ArgMatches, id: &str, target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        if !given_explicitly(matches, id) {
            *target = value;
        }
    }
}

fn fill_opt(matches: &ArgMatches, id: &str, target: &mut Option<String>, value: &Option<String>) {
    if value.is_some() && !given_explicitly(matches, id) {
        target.clone_from(value);
    }
}

/// Splits `bucket/prefix/` into the bucket and the remaining prefix.
pub fn split_bucket(filepath: &str) -> Option<(String, String)> {
    let filepath = filepath.trim_start_matches('/');
    let (bucket, prefix) = filepath.split_once('/').unwrap_or((filepath, ""));
    if bucket.is_empty() {
        return None;
    }
    Some((bucket.to_owned(), prefix.to_owned()))
}
