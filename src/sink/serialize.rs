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
use bytes::Bytes;
use parquet::{
    arrow::ArrowWriter,
    errors::ParquetError,
    file::properties::WriterProperties,
};

use crate::{cli::Options, utils::arrow::replace_null_columns};

pub fn writer_props(options: &Options) -> WriterProperties {
    WriterProperties::builder()
        .set_max_row_group_size(options.row_group_size)
        .set_compression(options.compression.into())
        .build()
}

/// Serializes `table` into an in-memory parquet file.
pub fn to_parquet_bytes(table: &RecordBatch, props: WriterProperties) -> Result<Bytes, ParquetError> {
    let table = replace_null_columns(table)?;

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, table.schema(), Some(props))?;
    writer.write(&table)?;
    writer.close()?;

    Ok(Bytes::from(buffer))
}
