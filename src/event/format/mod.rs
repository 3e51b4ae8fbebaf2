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

use arrow_array::RecordBatch;
use arrow_schema::ArrowError;

use super::Record;

pub mod json;

/// How buffered records are laid out as columns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// One column per field, types inferred and widened across records
    #[default]
    Columns,
    /// A single `record` column holding each record's JSON text
    JsonText,
}

impl RecordFormat {
    pub fn from_record_as_json(record_as_json: bool) -> Self {
        if record_as_json {
            RecordFormat::JsonText
        } else {
            RecordFormat::Columns
        }
    }
}

/// Converts a chunk of records into one record batch.
///
/// The batch has exactly `records.len()` rows, even when none of the records
/// carry any field.
pub fn into_recordbatch(records: &[Record], format: RecordFormat) -> Result<RecordBatch, ArrowError> {
    match format {
        RecordFormat::Columns => json::decode(records, json::infer_schema(records).into()),
        RecordFormat::JsonText => {
            let wrapped = json::wrap_as_json_text(records);
            json::decode(&wrapped, json::json_text_schema())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn records(value: serde_json::Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn flag_selects_format() {
        assert_eq!(RecordFormat::from_record_as_json(true), RecordFormat::JsonText);
        assert_eq!(RecordFormat::from_record_as_json(false), RecordFormat::Columns);
    }

    #[test]
    fn json_text_format_has_single_column() {
        let data = records(json!([{"a": 1, "b": "x"}, {"c": [1, 2]}]));
        let rb = into_recordbatch(&data, RecordFormat::JsonText).unwrap();

        assert_eq!(rb.num_rows(), 2);
        assert_eq!(rb.num_columns(), 1);
        assert_eq!(rb.schema().field(0).name(), json::JSON_RECORD_COLUMN);
    }

    #[test]
    fn columns_format_keeps_row_count_of_empty_records() {
        let data = records(json!([{}, {}, {}]));
        let rb = into_recordbatch(&data, RecordFormat::Columns).unwrap();

        assert_eq!(rb.num_rows(), 3);
        assert_eq!(rb.num_columns(), 0);
    }
}
