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

use std::{collections::HashMap, sync::Arc};

use arrow_array::{
    cast::AsArray,
    new_null_array,
    types::{Float64Type, Int64Type},
    ArrayRef, BooleanArray, Float64Array, Int64Array, NullArray, RecordBatch, RecordBatchOptions,
    StringArray,
};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use serde_json::{Map, Value};

use crate::{event::Record, utils::arrow::widen};

/// Name of the only column written when records are stored as JSON text.
pub const JSON_RECORD_COLUMN: &str = "record";

/// Returns the narrowest column type able to hold `value`.
pub fn value_data_type(value: &Value) -> DataType {
    match value {
        Value::Null => DataType::Null,
        Value::Bool(_) => DataType::Boolean,
        Value::Number(n) if n.is_i64() => DataType::Int64,
        Value::Number(n) if n.is_f64() => DataType::Float64,
        // u64 above i64::MAX, kept as text so no digits are lost
        Value::Number(_) => DataType::Utf8,
        Value::String(_) | Value::Array(_) | Value::Object(_) => DataType::Utf8,
    }
}

/// Text stored for a value in a Utf8 column.
///
/// Strings are kept verbatim, everything else is written as compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders a column as text, each value written exactly as [`value_to_text`]
/// writes the JSON value it was decoded from.
///
/// Used when a column is widened to Utf8 after it was decoded, so the text
/// of a value does not depend on which chunk it arrived in.
pub fn to_text_column(array: &ArrayRef) -> Result<ArrayRef, ArrowError> {
    let text: StringArray = match array.data_type() {
        DataType::Utf8 => return Ok(Arc::clone(array)),
        DataType::Null => return Ok(new_null_array(&DataType::Utf8, array.len())),
        DataType::Boolean => array
            .as_boolean()
            .iter()
            .map(|v| v.map(|v| value_to_text(&Value::Bool(v))))
            .collect(),
        DataType::Int64 => array
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map(|v| value_to_text(&Value::from(v))))
            .collect(),
        DataType::Float64 => array
            .as_primitive::<Float64Type>()
            .iter()
            .map(|v| v.map(|v| value_to_text(&Value::from(v))))
            .collect(),
        other => {
            return Err(ArrowError::CastError(format!(
                "Cannot render a {other} column as text"
            )))
        }
    };

    Ok(Arc::new(text))
}

// Collects every field seen in `records`, in order of first appearance,
// widening the type whenever two records disagree
pub fn infer_schema(records: &[Record]) -> Schema {
    let mut fields: Vec<(String, DataType)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records {
        for (name, value) in record {
            let data_type = value_data_type(value);
            match positions.get(name) {
                Some(&idx) => {
                    let current = &fields[idx].1;
                    // both sides are produced by value_data_type, so a join always exists
                    fields[idx].1 = widen(current, &data_type).unwrap_or(DataType::Utf8);
                }
                None => {
                    positions.insert(name.clone(), fields.len());
                    fields.push((name.clone(), data_type));
                }
            }
        }
    }

    Schema::new(
        fields
            .into_iter()
            .map(|(name, data_type)| Field::new(name, data_type, true))
            .collect::<Vec<_>>(),
    )
}

/// Builds a record batch from `records` following `schema`.
///
/// Fields missing from a record become nulls. Every field of the schema must
/// use one of the column types produced by [`value_data_type`].
pub fn decode(records: &[Record], schema: SchemaRef) -> Result<RecordBatch, ArrowError> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| build_column(field, records))
        .collect::<Result<Vec<_>, _>>()?;

    let options = RecordBatchOptions::new().with_row_count(Some(records.len()));
    RecordBatch::try_new_with_options(schema, columns, &options)
}

fn build_column(field: &Field, records: &[Record]) -> Result<ArrayRef, ArrowError> {
    let name = field.name();
    let values = records
        .iter()
        .map(|record| record.get(name).filter(|value| !value.is_null()));

    let array: ArrayRef = match field.data_type() {
        DataType::Null => Arc::new(NullArray::new(records.len())),
        DataType::Boolean => Arc::new(
            values
                .map(|v| v.and_then(Value::as_bool))
                .collect::<BooleanArray>(),
        ),
        DataType::Int64 => Arc::new(
            values
                .map(|v| v.and_then(Value::as_i64))
                .collect::<Int64Array>(),
        ),
        DataType::Float64 => Arc::new(
            values
                .map(|v| v.and_then(Value::as_f64))
                .collect::<Float64Array>(),
        ),
        DataType::Utf8 => Arc::new(values.map(|v| v.map(value_to_text)).collect::<StringArray>()),
        other => {
            return Err(ArrowError::SchemaError(format!(
                "Unsupported column type {other} for field {name}"
            )))
        }
    };

    Ok(array)
}

/// Wraps each record into `{"record": "<json text>"}`.
pub fn wrap_as_json_text(records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .map(|record| {
            let mut wrapped = Map::with_capacity(1);
            wrapped.insert(
                JSON_RECORD_COLUMN.to_owned(),
                Value::String(Value::Object(record.clone()).to_string()),
            );
            wrapped
        })
        .collect()
}

pub fn json_text_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new(
        JSON_RECORD_COLUMN,
        DataType::Utf8,
        true,
    )]))
}

#[cfg(test)]
mod tests {
    use arrow_array::Array;
    use serde_json::json;

    use super::*;

    trait TestExt {
        fn as_int64_arr(&self) -> Option<&Int64Array>;
        fn as_float64_arr(&self) -> Option<&Float64Array>;
        fn as_utf8_arr(&self) -> Option<&StringArray>;
    }

    impl TestExt for ArrayRef {
        fn as_int64_arr(&self) -> Option<&Int64Array> {
            self.as_any().downcast_ref()
        }

        fn as_float64_arr(&self) -> Option<&Float64Array> {
            self.as_any().downcast_ref()
        }

        fn as_utf8_arr(&self) -> Option<&StringArray> {
            self.as_any().downcast_ref()
        }
    }

    fn records(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn decode_inferred(data: &[Record]) -> RecordBatch {
        decode(data, Arc::new(infer_schema(data))).unwrap()
    }

    #[test]
    fn basic_object_into_rb() {
        let data = records(json!([{"c": 4.23, "a": 1, "b": "hello"}]));
        let rb = decode_inferred(&data);

        assert_eq!(rb.num_rows(), 1);
        assert_eq!(rb.num_columns(), 3);
        assert_eq!(
            rb.column_by_name("a").unwrap().as_int64_arr().unwrap(),
            &Int64Array::from_iter([1])
        );
        assert_eq!(
            rb.column_by_name("b").unwrap().as_utf8_arr().unwrap(),
            &StringArray::from_iter_values(["hello"])
        );
        assert_eq!(
            rb.column_by_name("c").unwrap().as_float64_arr().unwrap(),
            &Float64Array::from_iter([4.23])
        );
    }

    #[test]
    fn missing_fields_are_null() {
        let data = records(json!([
            {"b": "hello"},
            {"b": "hello", "a": 1, "c": 1},
            {"a": 1, "b": "hello", "c": null},
        ]));
        let rb = decode_inferred(&data);

        assert_eq!(rb.num_rows(), 3);
        assert_eq!(rb.num_columns(), 3);
        assert_eq!(
            rb.column_by_name("a").unwrap().as_int64_arr().unwrap(),
            &Int64Array::from(vec![None, Some(1), Some(1)])
        );
        assert_eq!(
            rb.column_by_name("c").unwrap().as_int64_arr().unwrap(),
            &Int64Array::from(vec![None, Some(1), None])
        );
    }

    #[test]
    fn int_and_float_widen_to_exact_text() {
        let data = records(json!([{"a": 9_007_199_254_740_993_i64}, {"a": 1.5}]));
        let rb = decode_inferred(&data);

        assert_eq!(rb.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(
            rb.column(0).as_utf8_arr().unwrap(),
            &StringArray::from(vec!["9007199254740993", "1.5"])
        );
    }

    #[test]
    fn decoded_columns_render_as_their_json_text() {
        let data = records(json!([
            {"n": 1e20, "i": -7, "b": true},
            {"n": 0.1, "i": null, "b": false},
        ]));
        let rb = decode_inferred(&data);

        for name in ["n", "i", "b"] {
            let text = to_text_column(rb.column_by_name(name).unwrap()).unwrap();
            let expected: StringArray = data
                .iter()
                .map(|record| record.get(name).filter(|v| !v.is_null()).map(value_to_text))
                .collect();
            assert_eq!(text.as_utf8_arr().unwrap(), &expected, "column {name}");
        }
    }

    #[test]
    fn number_and_string_widen_to_string() {
        let data = records(json!([{"a": 1}, {"a": "two"}, {"a": 3.5}, {"a": true}]));
        let rb = decode_inferred(&data);

        assert_eq!(rb.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(
            rb.column(0).as_utf8_arr().unwrap(),
            &StringArray::from(vec!["1", "two", "3.5", "true"])
        );
    }

    #[test]
    fn nested_values_are_stored_as_json_text() {
        let data = records(json!([{"tags": ["a", "b"], "meta": {"k": 1}}]));
        let rb = decode_inferred(&data);

        assert_eq!(
            rb.column_by_name("tags").unwrap().as_utf8_arr().unwrap(),
            &StringArray::from(vec![r#"["a","b"]"#])
        );
        assert_eq!(
            rb.column_by_name("meta").unwrap().as_utf8_arr().unwrap(),
            &StringArray::from(vec![r#"{"k":1}"#])
        );
    }

    #[test]
    fn only_null_values_give_null_column() {
        let data = records(json!([{"a": null}, {"a": null}]));
        let rb = decode_inferred(&data);

        assert_eq!(rb.schema().field(0).data_type(), &DataType::Null);
        assert_eq!(rb.column(0).len(), 2);
    }

    #[test]
    fn large_unsigned_stays_exact() {
        let data = records(json!([{"a": u64::MAX}]));
        let rb = decode_inferred(&data);

        assert_eq!(
            rb.column(0).as_utf8_arr().unwrap(),
            &StringArray::from(vec![u64::MAX.to_string()])
        );
    }

    #[test]
    fn json_text_round_trips() {
        let data = records(json!([
            {"id": 1, "name": "x", "when": "2024-01-01T00:00:00Z", "price": "12.50"},
            {"nested": {"list": [1, null, "a"]}},
        ]));
        let wrapped = wrap_as_json_text(&data);
        let rb = decode(&wrapped, json_text_schema()).unwrap();
        let column = rb.column(0).as_utf8_arr().unwrap().clone();

        for (idx, original) in data.iter().enumerate() {
            let parsed: Value = serde_json::from_str(column.value(idx)).unwrap();
            assert_eq!(parsed, Value::Object(original.clone()));
        }
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Date32, true)]));
        let data = records(json!([{"a": "2024-01-01"}]));

        assert!(decode(&data, schema).is_err());
    }
}
