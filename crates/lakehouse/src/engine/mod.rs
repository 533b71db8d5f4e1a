// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The seam between the workflow and the external query engine.
//!
//! An [`Engine`] accepts typed [`Statement`]s and dataframe-style calls and
//! returns results as Arrow record batches. Two implementations ship with
//! this crate:
//!
//! - [`LivyEngine`](livy::LivyEngine) drives a managed Spark cluster through
//!   the Apache Livy REST API.
//! - [`MemoryEngine`](memory::MemoryEngine) is an in-process stand-in that
//!   keeps Iceberg-like tables in memory and reads files with DataFusion.

pub mod livy;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use datafusion::arrow::array::{
    Array, AsArray, Int32Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use datafusion::arrow::record_batch::RecordBatch;

use crate::error::{Error, ErrorKind, Result};
use crate::ident::TableRef;
use crate::source::SourceFile;
use crate::statement::Statement;

/// A session with a query engine backed by an Iceberg catalog.
///
/// Calls are issued one at a time and each blocks until the engine answers.
/// Frames are moved into the call that consumes them; an engine never
/// hands the same frame out twice.
#[async_trait]
pub trait Engine: Send {
    /// Transient handle to a batch of records loaded from storage.
    type Frame: Send;

    /// Submit one statement and return its result rows.
    ///
    /// DDL and DML statements return no batches.
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<RecordBatch>>;

    /// Load an external file.
    async fn read(&mut self, source: &SourceFile) -> Result<Self::Frame>;

    /// Positional union of two frames, `left` rows first.
    async fn union(&mut self, left: Self::Frame, right: Self::Frame) -> Result<Self::Frame>;

    /// Number of rows in a frame.
    async fn count(&mut self, frame: &Self::Frame) -> Result<u64>;

    /// Register a frame under a session-scoped view name, replacing any
    /// existing view of that name.
    async fn create_or_replace_temp_view(&mut self, name: &str, frame: Self::Frame) -> Result<()>;

    /// Create a new table holding the frame's rows. Fails if the table exists.
    async fn write_to_create(&mut self, frame: Self::Frame, table: &TableRef) -> Result<()>;

    /// Append the frame's rows to an existing table, matching columns by
    /// position.
    async fn insert_into(&mut self, frame: Self::Frame, table: &TableRef) -> Result<()>;

    /// Release the session.
    async fn stop(&mut self) -> Result<()>;
}

/// Total number of rows across batches.
pub fn row_count(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::num_rows).sum()
}

/// Read a single integer from the first column of the first row, as
/// produced by `count(*)`.
pub fn scalar_u64(batches: &[RecordBatch]) -> Result<u64> {
    let batch = batches
        .iter()
        .find(|b| b.num_rows() > 0)
        .ok_or_else(|| Error::new(ErrorKind::Unexpected, "Query returned no rows"))?;
    let column = batch.column(0);

    let value = match column.data_type() {
        DataType::Int64 => column
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(0)),
        DataType::Int32 => column
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| a.value(0) as i64),
        DataType::Utf8 => column
            .as_any()
            .downcast_ref::<StringArray>()
            .and_then(|a| a.value(0).parse::<i64>().ok()),
        _ => None,
    };

    value
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::Unexpected,
                format!("Expected a non-negative integer, got {}", column.data_type()),
            )
        })
}

/// Values of a named string column across batches, skipping nulls.
pub fn string_column(batches: &[RecordBatch], name: &str) -> Result<Vec<String>> {
    let mut values = Vec::new();
    for batch in batches {
        let column = batch.column_by_name(name).ok_or_else(|| {
            Error::new(
                ErrorKind::Unexpected,
                format!("Result has no column '{name}'"),
            )
        })?;
        let Some(strings) = column.as_string_opt::<i32>() else {
            return Err(Error::new(
                ErrorKind::Unexpected,
                format!("Column '{name}' is {}, expected string", column.data_type()),
            ));
        };
        values.extend(strings.iter().flatten().map(str::to_string));
    }
    Ok(values)
}

pub(crate) fn parse_timestamp_text(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(value, crate::statement::TIMESTAMP_LITERAL_FORMAT) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|ts| ts.and_utc())
}

/// Values of a named timestamp column across batches.
///
/// Accepts native microsecond timestamps and the text forms Spark emits in
/// JSON results.
pub fn timestamp_column(batches: &[RecordBatch], name: &str) -> Result<Vec<DateTime<Utc>>> {
    let mut values = Vec::new();
    for batch in batches {
        let column = batch.column_by_name(name).ok_or_else(|| {
            Error::new(
                ErrorKind::Unexpected,
                format!("Result has no column '{name}'"),
            )
        })?;

        match column.data_type() {
            DataType::Timestamp(TimeUnit::Microsecond, _) => {
                let array = column
                    .as_any()
                    .downcast_ref::<TimestampMicrosecondArray>()
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Unexpected, "Timestamp column downcast failed")
                    })?;
                for micros in array.iter().flatten() {
                    let ts = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                        Error::new(
                            ErrorKind::DataInvalid,
                            format!("Timestamp {micros} is out of range"),
                        )
                    })?;
                    values.push(ts);
                }
            }
            DataType::Utf8 => {
                for text in column.as_string::<i32>().iter().flatten() {
                    let ts = parse_timestamp_text(text).ok_or_else(|| {
                        Error::new(
                            ErrorKind::DataInvalid,
                            format!("Cannot parse timestamp '{text}' in column '{name}'"),
                        )
                    })?;
                    values.push(ts);
                }
            }
            other => {
                return Err(Error::new(
                    ErrorKind::Unexpected,
                    format!("Column '{name}' is {other}, expected timestamp"),
                ));
            }
        }
    }
    Ok(values)
}
