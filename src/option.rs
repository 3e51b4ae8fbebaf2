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

use parquet::basic::{BrotliLevel, GzipLevel, ZstdLevel};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Lzo,
    Brotli,
    Lz4,
    #[serde(rename = "lz4_raw")]
    Lz4Raw,
    Zstd,
}

impl From<Compression> for parquet::basic::Compression {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Uncompressed => parquet::basic::Compression::UNCOMPRESSED,
            Compression::Snappy => parquet::basic::Compression::SNAPPY,
            Compression::Gzip => parquet::basic::Compression::GZIP(GzipLevel::default()),
            Compression::Lzo => parquet::basic::Compression::LZO,
            Compression::Brotli => parquet::basic::Compression::BROTLI(BrotliLevel::default()),
            Compression::Lz4 => parquet::basic::Compression::LZ4,
            Compression::Lz4Raw => parquet::basic::Compression::LZ4_RAW,
            Compression::Zstd => parquet::basic::Compression::ZSTD(ZstdLevel::default()),
        }
    }
}

/// What the input loop does when a batch cannot be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushFailurePolicy {
    /// Stop processing input and exit with an error
    #[default]
    FailFast,
    /// Log the failure, keep the batch in memory and carry on with other batches
    BestEffort,
}

impl fmt::Display for FlushFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushFailurePolicy::FailFast => write!(f, "fail-fast"),
            FlushFailurePolicy::BestEffort => write!(f, "best-effort"),
        }
    }
}

pub mod validation {
    use std::{
        env, io,
        path::{Path, PathBuf},
    };

    use path_clean::PathClean;

    use crate::{
        cli::{MAX_RECORD_AGE_IN_MINUTES, MAX_SWEEP_INTERVAL_SECS, MAX_UPLOAD_BACKOFF_MS},
        sink::naming,
    };

    use super::{Compression, FlushFailurePolicy};

    pub fn file_path(s: &str) -> Result<PathBuf, String> {
        if s.is_empty() {
            return Err("empty path".to_owned());
        }

        let path = PathBuf::from(s);

        if !path.is_file() {
            return Err("path specified does not point to an accessible file".to_string());
        }

        Ok(path)
    }

    pub fn absolute_path(path: impl AsRef<Path>) -> io::Result<PathBuf> {
        let path = path.as_ref();

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir()?.join(path)
        }
        .clean();

        Ok(absolute_path)
    }

    pub fn canonicalize_path(s: &str) -> Result<PathBuf, String> {
        absolute_path(PathBuf::from(s)).map_err(|e| format!("Unable to resolve path {s}: {e}"))
    }

    pub fn compression(s: &str) -> Result<Compression, String> {
        match s {
            "uncompressed" => Ok(Compression::Uncompressed),
            "snappy" => Ok(Compression::Snappy),
            "gzip" => Ok(Compression::Gzip),
            "lzo" => Ok(Compression::Lzo),
            "brotli" => Ok(Compression::Brotli),
            "lz4" => Ok(Compression::Lz4),
            "lz4_raw" => Ok(Compression::Lz4Raw),
            "zstd" => Ok(Compression::Zstd),
            _ => Err("Invalid COMPRESSION provided".to_string()),
        }
    }

    pub fn flush_failure_policy(s: &str) -> Result<FlushFailurePolicy, String> {
        match s {
            "fail-fast" => Ok(FlushFailurePolicy::FailFast),
            "best-effort" => Ok(FlushFailurePolicy::BestEffort),
            _ => Err("Invalid FLUSH FAILURE POLICY provided, expected fail-fast or best-effort".to_string()),
        }
    }

    pub fn non_zero_usize(s: &str) -> Result<usize, String> {
        match s.parse::<usize>() {
            Ok(0) => Err("Value must be at least 1".to_string()),
            Ok(value) => Ok(value),
            Err(_) => Err(format!("Invalid value {s}, expected a positive integer")),
        }
    }

    pub fn bounded_u64(s: &str, min: u64, max: u64) -> Result<u64, String> {
        let value = s
            .parse::<u64>()
            .map_err(|_| format!("Invalid value {s}, expected a positive integer"))?;
        if !(min..=max).contains(&value) {
            return Err(format!("Value must be between {min} and {max}"));
        }
        Ok(value)
    }

    pub fn max_record_age_in_minutes(s: &str) -> Result<u64, String> {
        bounded_u64(s, 1, MAX_RECORD_AGE_IN_MINUTES)
    }

    pub fn upload_backoff_ms(s: &str) -> Result<u64, String> {
        bounded_u64(s, 0, MAX_UPLOAD_BACKOFF_MS)
    }

    pub fn sweep_interval_secs(s: &str) -> Result<u64, String> {
        bounded_u64(s, 1, MAX_SWEEP_INTERVAL_SECS)
    }

    pub fn file_naming_scheme(s: &str) -> Result<String, String> {
        naming::validate_template(s)?;
        Ok(s.to_owned())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn zero_is_rejected() {
            assert!(non_zero_usize("0").is_err());
            assert!(non_zero_usize("-3").is_err());
            assert_eq!(non_zero_usize("10000"), Ok(10000));
        }

        #[test]
        fn bounded_values() {
            assert_eq!(max_record_age_in_minutes("5"), Ok(5));
            assert!(max_record_age_in_minutes("0").is_err());
            assert!(max_record_age_in_minutes(&u64::MAX.to_string()).is_err());
            assert_eq!(upload_backoff_ms("0"), Ok(0));
            assert!(upload_backoff_ms("3600001").is_err());
            assert!(sweep_interval_secs("86401").is_err());
        }

        #[test]
        fn compression_names() {
            assert_eq!(compression("snappy"), Ok(Compression::Snappy));
            assert_eq!(compression("lz4_raw"), Ok(Compression::Lz4Raw));
            assert!(compression("lz5").is_err());
        }

        #[test]
        fn policy_names() {
            assert_eq!(
                flush_failure_policy("best-effort"),
                Ok(FlushFailurePolicy::BestEffort)
            );
            assert!(flush_failure_policy("never").is_err());
        }

        #[test]
        fn relative_paths_are_made_absolute() {
            let path = canonicalize_path("./data/../data").unwrap();
            assert!(path.is_absolute());
            assert!(path.ends_with("data"));
        }

        #[test]
        fn naming_scheme_placeholders_are_checked() {
            assert!(file_naming_scheme("{stream}-{timestamp}.{format}").is_ok());
            assert!(file_naming_scheme("{stream}-{date}.{format}").is_err());
        }
    }
}
