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

pub mod cli;
pub mod event;
pub mod handlers;
pub mod option;
pub mod sink;
pub mod staging;
pub mod storage;
pub mod sync;
pub mod utils;

pub use sink::{FlushError, Sink, UploadedFile};
pub use staging::{Accumulator, BatchError};

pub const LOCK_EXPECT: &str = "Thread shouldn't panic while holding a lock";

/// File extension and `{format}` value of every uploaded object.
pub const OUTPUT_FORMAT: &str = "parquet";
