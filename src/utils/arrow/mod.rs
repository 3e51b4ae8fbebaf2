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

use std::sync::Arc;

use arrow_array::{new_null_array, ArrayRef, RecordBatch};
use arrow_schema::{ArrowError, DataType, Field, Schema};
use arrow_select::concat::concat_batches;

pub mod batch_adapter;

pub use batch_adapter::adapt_batch;

/// Column types a batch table may hold.
pub const SUPPORTED_TYPES: [DataType; 5] = [
    DataType::Null,
    DataType::Boolean,
    DataType::Int64,
    DataType::Float64,
    DataType::Utf8,
];

pub fn is_supported(data_type: &DataType) -> bool {
    SUPPORTED_TYPES.contains(data_type)
}

/// Joins two column types into the narrowest type that holds every value of
/// both without loss.
///
/// `Null` joins to the other side and every other mismatch joins to `Utf8`.
/// `Int64` with `Float64` joins to `Utf8` as well, a double cannot hold every
/// 64 bit integer. Returns `None` when either side is not one of
/// [`SUPPORTED_TYPES`].
pub fn widen(left: &DataType, right: &DataType) -> Option<DataType> {
    if !is_supported(left) || !is_supported(right) {
        return None;
    }

    let joined = match (left, right) {
        (l, r) if l == r => l.clone(),
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        _ => DataType::Utf8,
    };

    Some(joined)
}

/// Union of both schemas, `current` columns first and new ones after in the
/// order they appear in `incoming`. Columns present on both sides get the
/// widened type.
pub fn merge_schema(current: &Schema, incoming: &Schema) -> Result<Schema, ArrowError> {
    let mut fields = current
        .fields()
        .iter()
        .map(|field| {
            let data_type = match incoming.field_with_name(field.name()) {
                Ok(other) => widen(field.data_type(), other.data_type()),
                Err(_) => is_supported(field.data_type()).then(|| field.data_type().clone()),
            };
            data_type
                .map(|data_type| Field::new(field.name(), data_type, true))
                .ok_or_else(|| unsupported(field))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for field in incoming.fields() {
        if fields.iter().any(|existing| existing.name() == field.name()) {
            continue;
        }
        if !is_supported(field.data_type()) {
            return Err(unsupported(field));
        }
        fields.push(Field::new(field.name(), field.data_type().clone(), true));
    }

    Ok(Schema::new(fields))
}

fn unsupported(field: &Field) -> ArrowError {
    ArrowError::SchemaError(format!(
        "Column {} has type {} which cannot be reconciled",
        field.name(),
        field.data_type()
    ))
}

/// Concatenates `table` and `chunk` into a single batch over the merged
/// schema. Neither side loses a column, rows missing a column read as null.
pub fn concat_widened(table: &RecordBatch, chunk: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    let schema = Arc::new(merge_schema(&table.schema(), &chunk.schema())?);
    let batches = [adapt_batch(&schema, table)?, adapt_batch(&schema, chunk)?];

    concat_batches(&schema, batches.iter())
}

/// Replaces columns that never saw a value with nullable Utf8 columns, the
/// parquet writer has no use for untyped columns.
pub fn replace_null_columns(rb: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    if !rb
        .schema()
        .fields()
        .iter()
        .any(|field| field.data_type().is_null())
    {
        return Ok(rb.clone());
    }

    let (fields, columns): (Vec<Field>, Vec<ArrayRef>) = rb
        .schema()
        .fields()
        .iter()
        .zip(rb.columns())
        .map(|(field, column)| {
            if field.data_type().is_null() {
                (
                    Field::new(field.name(), DataType::Utf8, true),
                    new_null_array(&DataType::Utf8, rb.num_rows()),
                )
            } else {
                (field.as_ref().clone(), Arc::clone(column))
            }
        })
        .unzip();

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

#[cfg(test)]
mod tests {
    use arrow_array::{Array, Float64Array, Int64Array, StringArray};
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DataType::Null, DataType::Int64, DataType::Int64)]
    #[case(DataType::Int64, DataType::Null, DataType::Int64)]
    #[case(DataType::Int64, DataType::Int64, DataType::Int64)]
    #[case(DataType::Int64, DataType::Float64, DataType::Utf8)]
    #[case(DataType::Float64, DataType::Int64, DataType::Utf8)]
    #[case(DataType::Float64, DataType::Float64, DataType::Float64)]
    #[case(DataType::Int64, DataType::Utf8, DataType::Utf8)]
    #[case(DataType::Float64, DataType::Utf8, DataType::Utf8)]
    #[case(DataType::Boolean, DataType::Int64, DataType::Utf8)]
    #[case(DataType::Utf8, DataType::Boolean, DataType::Utf8)]
    #[case(DataType::Null, DataType::Null, DataType::Null)]
    fn widening_order(#[case] left: DataType, #[case] right: DataType, #[case] expected: DataType) {
        assert_eq!(widen(&left, &right), Some(expected));
    }

    #[test]
    fn widening_rejects_foreign_types() {
        assert_eq!(widen(&DataType::Date32, &DataType::Utf8), None);
    }

    fn batch(fields: Vec<(&str, ArrayRef)>) -> RecordBatch {
        RecordBatch::try_from_iter(fields).unwrap()
    }

    #[test]
    fn disjoint_columns_are_unioned() {
        let left = batch(vec![("a", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef)]);
        let right = batch(vec![("b", Arc::new(StringArray::from(vec!["x"])) as ArrayRef)]);

        let merged = concat_widened(&left, &right).unwrap();

        assert_eq!(merged.num_rows(), 3);
        let schema = merged.schema();
        let names: Vec<&str> = schema
            .fields()
            .iter()
            .map(|field| field.name().as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        let a = merged.column_by_name("a").unwrap();
        let b = merged.column_by_name("b").unwrap();
        assert_eq!(a.null_count(), 1);
        assert_eq!(b.null_count(), 2);
        assert!(b.is_null(0) && b.is_null(1) && b.is_valid(2));
    }

    #[test]
    fn conflicting_columns_are_widened_without_loss() {
        let left = batch(vec![("a", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef)]);
        let right = batch(vec![(
            "a",
            Arc::new(StringArray::from(vec!["three"])) as ArrayRef,
        )]);

        let merged = concat_widened(&left, &right).unwrap();

        assert_eq!(merged.schema().field(0).data_type(), &DataType::Utf8);
        let a = merged
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(a, &StringArray::from(vec!["1", "2", "three"]));
    }

    #[test]
    fn int_beyond_double_precision_keeps_every_digit() {
        // 2^53 + 1 has no exact double
        let left = batch(vec![(
            "id",
            Arc::new(Int64Array::from(vec![9_007_199_254_740_993])) as ArrayRef,
        )]);
        let right = batch(vec![("id", Arc::new(Float64Array::from(vec![0.5])) as ArrayRef)]);

        let merged = concat_widened(&left, &right).unwrap();

        assert_eq!(merged.schema().field(0).data_type(), &DataType::Utf8);
        let id = merged
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(id, &StringArray::from(vec!["9007199254740993", "0.5"]));
    }

    #[test]
    fn null_columns_become_utf8() {
        let rb = batch(vec![
            ("a", Arc::new(Int64Array::from(vec![1])) as ArrayRef),
            ("b", new_null_array(&DataType::Null, 1)),
        ]);

        let replaced = replace_null_columns(&rb).unwrap();

        assert_eq!(replaced.schema().field(1).data_type(), &DataType::Utf8);
        assert_eq!(replaced.column(1).null_count(), 1);
    }

    #[test]
    fn foreign_column_type_is_a_reconciliation_error() {
        let current = Schema::new(vec![Field::new("a", DataType::Date32, true)]);
        let incoming = Schema::new(vec![Field::new("a", DataType::Utf8, true)]);

        assert!(merge_schema(&current, &incoming).is_err());
    }
}
