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

use arrow_array::{new_null_array, ArrayRef, RecordBatch, RecordBatchOptions};
use arrow_cast::cast;
use arrow_schema::{ArrowError, DataType, SchemaRef};

use crate::event::format::json::to_text_column;

// This function takes a record batch and the schema of the table it is
// about to join. It returns a new record batch following the table schema:
// columns missing from the batch are filled with nulls and columns whose
// type differs are cast to the table's (wider) type. Columns widened to text
// are rendered the way the decoder renders values into a text column.
// All the record batches making up a table need to share one schema.
pub fn adapt_batch(table_schema: &SchemaRef, batch: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    let batch_schema = batch.schema();
    let num_rows = batch.num_rows();

    let mut cols: Vec<ArrayRef> = Vec::with_capacity(table_schema.fields().len());
    for table_field in table_schema.fields() {
        let col = match batch_schema.column_with_name(table_field.name()) {
            Some((idx, field)) if field.data_type() == table_field.data_type() => {
                Arc::clone(batch.column(idx))
            }
            Some((idx, _)) if table_field.data_type() == &DataType::Utf8 => {
                to_text_column(batch.column(idx))?
            }
            Some((idx, _)) => cast(batch.column(idx), table_field.data_type())?,
            None => new_null_array(table_field.data_type(), num_rows),
        };
        cols.push(col);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    RecordBatch::try_new_with_options(Arc::clone(table_schema), cols, &options)
}
