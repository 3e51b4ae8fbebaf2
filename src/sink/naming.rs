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

//! Output path rendering.
//!
//! A path is `filepath` followed by the rendered file naming scheme. The
//! scheme may use these placeholders:
//!
//! - `{stream}`: the stream name
//! - `{timestamp}`: flush time in UTC, formatted as `%Y%m%dT%H%M%S`
//! - `{format}`: the file format, always `parquet`
//! - `{batch_id}`: the batch id handed out by the input decoder
//! - `{uid}`: a fresh ULID
//!
//! Two flushes within the same second can render the same path, from one
//! stream or, when the scheme has no `{stream}`, from different streams. The
//! namer remembers the paths it handed out and appends `-1`, `-2`, ... before
//! the extension when one would repeat. With `{timestamp}` in the scheme only
//! the paths of the current second are remembered, with `{uid}` every path is
//! unique and nothing is remembered.

use std::{collections::HashMap, sync::Mutex};

use chrono::{DateTime, Utc};
use relative_path::{RelativePath, RelativePathBuf};
use ulid::Ulid;

use crate::{event::BatchKey, LOCK_EXPECT, OUTPUT_FORMAT};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

const PLACEHOLDERS: [&str; 5] = ["stream", "timestamp", "format", "batch_id", "uid"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, String> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("Unclosed placeholder in file naming scheme {template}"))?;
        let name = &after[..close];
        if !PLACEHOLDERS.contains(&name) {
            return Err(format!(
                "Unknown placeholder {{{name}}} in file naming scheme, expected one of {}",
                PLACEHOLDERS.map(|p| format!("{{{p}}}")).join(", ")
            ));
        }
        segments.push(Segment::Placeholder(name));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }

    Ok(segments)
}

pub fn validate_template(template: &str) -> Result<(), String> {
    if template.trim().is_empty() {
        return Err("File naming scheme cannot be empty".to_owned());
    }
    parse(template).map(|_| ())
}

/// Renders `template` for a flush of `key` happening at `now`.
pub fn render(template: &str, key: &BatchKey, now: DateTime<Utc>) -> Result<String, String> {
    let rendered = parse(template)?
        .into_iter()
        .map(|segment| match segment {
            Segment::Literal(text) => text.to_owned(),
            Segment::Placeholder("stream") => key.stream_name.clone(),
            Segment::Placeholder("timestamp") => now.format(TIMESTAMP_FORMAT).to_string(),
            Segment::Placeholder("format") => OUTPUT_FORMAT.to_owned(),
            Segment::Placeholder("batch_id") => key.batch_id.clone(),
            Segment::Placeholder(_) => Ulid::new().to_string(),
        })
        .collect();

    Ok(rendered)
}

#[derive(Debug, Default)]
struct Issued {
    // second the remembered paths were rendered in
    second: Option<i64>,
    // path handed out and how often it was asked for again
    repeats: HashMap<RelativePathBuf, u32>,
}

#[derive(Debug)]
pub struct FileNamer {
    filepath: String,
    template: String,
    has_timestamp: bool,
    has_uid: bool,
    issued: Mutex<Issued>,
}

impl FileNamer {
    pub fn new(filepath: &str, template: &str) -> Result<Self, String> {
        validate_template(template)?;
        let segments = parse(template)?;
        Ok(Self {
            filepath: filepath.trim_start_matches('/').to_owned(),
            template: template.to_owned(),
            has_timestamp: segments.contains(&Segment::Placeholder("timestamp")),
            has_uid: segments.contains(&Segment::Placeholder("uid")),
            issued: Mutex::new(Issued::default()),
        })
    }

    pub fn path_for(&self, key: &BatchKey, now: DateTime<Utc>) -> RelativePathBuf {
        // the template is checked in `new`
        let name = render(&self.template, key, now).unwrap_or_default();
        let path = RelativePathBuf::from(format!("{}{name}", self.filepath));
        if self.has_uid {
            return path;
        }

        let mut issued = self.issued.lock().expect(LOCK_EXPECT);
        if self.has_timestamp && issued.second != Some(now.timestamp()) {
            issued.second = Some(now.timestamp());
            issued.repeats.clear();
        }
        match issued.repeats.get_mut(&path) {
            Some(repeats) => {
                *repeats += 1;
                with_counter(&path, *repeats)
            }
            None => {
                issued.repeats.insert(path.clone(), 0);
                path
            }
        }
    }
}

fn with_counter(path: &RelativePath, counter: u32) -> RelativePathBuf {
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(extension)) => path.with_file_name(format!("{stem}-{counter}.{extension}")),
        (Some(stem), None) => path.with_file_name(format!("{stem}-{counter}")),
        _ => RelativePathBuf::from(format!("{path}-{counter}")),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;

    const DEFAULT_SCHEME: &str = "{stream}-{timestamp}.{format}";

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    fn orders() -> BatchKey {
        BatchKey::new("orders", "b1")
    }

    #[test]
    fn renders_default_scheme() {
        let namer = FileNamer::new("target_s3_polars/", DEFAULT_SCHEME).unwrap();

        assert_eq!(
            namer.path_for(&orders(), at()),
            RelativePathBuf::from("target_s3_polars/orders-20240309T140507.parquet")
        );
    }

    #[test]
    fn repeated_path_gets_a_counter() {
        let namer = FileNamer::new("out/", DEFAULT_SCHEME).unwrap();

        let first = namer.path_for(&orders(), at());
        let second = namer.path_for(&orders(), at());
        let third = namer.path_for(&orders(), at());

        assert_eq!(first.as_str(), "out/orders-20240309T140507.parquet");
        assert_eq!(second.as_str(), "out/orders-20240309T140507-1.parquet");
        assert_eq!(third.as_str(), "out/orders-20240309T140507-2.parquet");
    }

    #[test]
    fn counter_resets_on_a_new_second() {
        let namer = FileNamer::new("out/", DEFAULT_SCHEME).unwrap();

        namer.path_for(&orders(), at());
        namer.path_for(&orders(), at());
        let later = namer.path_for(&orders(), at() + TimeDelta::seconds(1));

        assert_eq!(later.as_str(), "out/orders-20240309T140508.parquet");
    }

    #[test]
    fn streams_do_not_share_counters() {
        let namer = FileNamer::new("out/", DEFAULT_SCHEME).unwrap();

        namer.path_for(&orders(), at());
        let users = namer.path_for(&BatchKey::new("users", "b1"), at());

        assert_eq!(users.as_str(), "out/users-20240309T140507.parquet");
    }

    #[test]
    fn streams_sharing_a_scheme_without_stream_get_distinct_paths() {
        let namer = FileNamer::new("out/", "{timestamp}.{format}").unwrap();

        let orders = namer.path_for(&orders(), at());
        let users = namer.path_for(&BatchKey::new("users", "b1"), at());
        let orders_again = namer.path_for(&BatchKey::new("orders", "b2"), at());

        assert_eq!(orders.as_str(), "out/20240309T140507.parquet");
        assert_eq!(users.as_str(), "out/20240309T140507-1.parquet");
        assert_eq!(orders_again.as_str(), "out/20240309T140507-2.parquet");
    }

    #[test]
    fn batch_id_and_uid_placeholders() {
        let namer = FileNamer::new("", "{stream}/{batch_id}/{uid}.{format}").unwrap();

        let first = namer.path_for(&orders(), at());
        let second = namer.path_for(&orders(), at());

        assert!(first.as_str().starts_with("orders/b1/"));
        assert!(first.as_str().ends_with(".parquet"));
        assert_ne!(first, second);
    }

    #[test]
    fn template_without_extension() {
        let namer = FileNamer::new("", "{stream}").unwrap();

        namer.path_for(&orders(), at());
        assert_eq!(namer.path_for(&orders(), at()).as_str(), "orders-1");
    }

    #[test]
    fn invalid_templates_are_rejected() {
        assert!(validate_template("{stream}-{date}").is_err());
        assert!(validate_template("{stream").is_err());
        assert!(validate_template("").is_err());
        assert!(FileNamer::new("out/", "{nope}").is_err());
    }
}
