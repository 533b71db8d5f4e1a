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

//! Conversions between SQL literals, frames and table schemas.

use std::sync::Arc;

use chrono::NaiveDateTime;
use datafusion::arrow::array::{
    ArrayRef, BooleanArray, Decimal128Array, Float64Array, Int32Array, Int64Array, StringArray,
    TimestampMicrosecondArray, new_null_array,
};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use datafusion::arrow::record_batch::RecordBatch;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{Error, ErrorKind, Result};
use crate::schema::{Literal, varchar_length};

/// Same fields with every column nullable.
pub(crate) fn nullable_schema(schema: &Schema) -> SchemaRef {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| f.as_ref().clone().with_nullable(true))
        .collect();
    Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
}

/// Rebind a batch's columns to an identically typed schema.
pub(crate) fn rebind(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    Ok(RecordBatch::try_new(schema.clone(), batch.columns().to_vec())?)
}

/// Match a batch to `schema` by position, casting where arrow can.
pub(crate) fn conform_by_position(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    if batch.num_columns() != schema.fields().len() {
        return Err(Error::new(
            ErrorKind::SchemaMismatch,
            format!(
                "Cannot write {} columns into a table with {} columns",
                batch.num_columns(),
                schema.fields().len()
            ),
        ));
    }

    let columns = batch
        .columns()
        .iter()
        .zip(schema.fields().iter())
        .map(|(column, field)| {
            if column.data_type() == field.data_type() {
                return Ok(column.clone());
            }
            cast(column, field.data_type()).map_err(|e| {
                Error::new(
                    ErrorKind::SchemaMismatch,
                    format!(
                        "Cannot write {} into column '{}' of type {}",
                        column.data_type(),
                        field.name(),
                        field.data_type()
                    ),
                )
                .with_source(e)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Project a stored batch onto the current table schema by column name.
///
/// Columns added after the batch was written read as nulls.
pub(crate) fn project_by_name(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(column) if column.data_type() == field.data_type() => Ok(column.clone()),
            Some(column) => Ok(cast(column, field.data_type())?),
            None => Ok(new_null_array(field.data_type(), batch.num_rows())),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn mismatch(field: &Field, literal: &Literal) -> Error {
    Error::new(
        ErrorKind::SchemaMismatch,
        format!(
            "Cannot insert {literal} into column '{}' of type {}",
            field.name(),
            field.data_type()
        ),
    )
}

fn to_decimal(field: &Field, literal: &Literal) -> Result<Option<Decimal>> {
    match literal {
        Literal::Null => Ok(None),
        Literal::Integer(v) => Ok(Some(Decimal::from(*v))),
        Literal::Float(v) => Ok(Some(Decimal::try_from(*v)?)),
        Literal::Decimal(v) => Ok(Some(*v)),
        Literal::String(v) => Ok(Some(Decimal::from_str_exact(v)?)),
        Literal::Boolean(_) => Err(mismatch(field, literal)),
    }
}

fn decimal_column(field: &Field, values: &[&Literal], precision: u8, scale: i8) -> Result<ArrayRef> {
    let limit = 10i128.pow(precision as u32);
    let mut out = Vec::with_capacity(values.len());
    for literal in values {
        let Some(mut value) = to_decimal(field, literal)? else {
            out.push(None);
            continue;
        };
        value.rescale(scale.max(0) as u32);
        let mantissa = value.mantissa();
        if mantissa.abs() >= limit {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "{literal} does not fit column '{}' of type DECIMAL({precision}, {scale})",
                    field.name()
                ),
            ));
        }
        out.push(Some(mantissa));
    }
    Ok(Arc::new(
        Decimal128Array::from(out).with_precision_and_scale(precision, scale)?,
    ))
}

fn literal_column(field: &Field, values: &[&Literal]) -> Result<ArrayRef> {
    let array: ArrayRef = match field.data_type() {
        DataType::Boolean => Arc::new(
            values
                .iter()
                .map(|l| match l {
                    Literal::Null => Ok(None),
                    Literal::Boolean(v) => Ok(Some(*v)),
                    other => Err(mismatch(field, other)),
                })
                .collect::<Result<BooleanArray>>()?,
        ),
        DataType::Int32 => Arc::new(
            values
                .iter()
                .map(|l| match l {
                    Literal::Null => Ok(None),
                    Literal::Integer(v) => i32::try_from(*v)
                        .map(Some)
                        .map_err(|_| mismatch(field, l)),
                    other => Err(mismatch(field, other)),
                })
                .collect::<Result<Int32Array>>()?,
        ),
        DataType::Int64 => Arc::new(
            values
                .iter()
                .map(|l| match l {
                    Literal::Null => Ok(None),
                    Literal::Integer(v) => Ok(Some(*v)),
                    other => Err(mismatch(field, other)),
                })
                .collect::<Result<Int64Array>>()?,
        ),
        DataType::Float64 => Arc::new(
            values
                .iter()
                .map(|l| match l {
                    Literal::Null => Ok(None),
                    Literal::Integer(v) => Ok(Some(*v as f64)),
                    Literal::Float(v) => Ok(Some(*v)),
                    Literal::Decimal(v) => v.to_f64().map(Some).ok_or_else(|| mismatch(field, l)),
                    other => Err(mismatch(field, other)),
                })
                .collect::<Result<Float64Array>>()?,
        ),
        DataType::Utf8 => {
            let max_len = varchar_length(field);
            Arc::new(
                values
                    .iter()
                    .map(|l| match l {
                        Literal::Null => Ok(None),
                        Literal::String(v) => match max_len {
                            Some(len) if v.chars().count() > len => Err(Error::new(
                                ErrorKind::DataInvalid,
                                format!(
                                    "Value '{v}' exceeds VARCHAR({len}) of column '{}'",
                                    field.name()
                                ),
                            )),
                            _ => Ok(Some(v.as_str())),
                        },
                        other => Err(mismatch(field, other)),
                    })
                    .collect::<Result<StringArray>>()?,
            )
        }
        DataType::Decimal128(precision, scale) => {
            decimal_column(field, values, *precision, *scale)?
        }
        DataType::Timestamp(TimeUnit::Microsecond, tz) => {
            let array = values
                .iter()
                .map(|l| match l {
                    Literal::Null => Ok(None),
                    Literal::String(v) => NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S%.f")
                        .map(|ts| Some(ts.and_utc().timestamp_micros()))
                        .map_err(|_| mismatch(field, l)),
                    other => Err(mismatch(field, other)),
                })
                .collect::<Result<TimestampMicrosecondArray>>()?;
            match tz {
                Some(tz) => Arc::new(array.with_timezone(tz.clone())),
                None => Arc::new(array),
            }
        }
        other => {
            return Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Literal inserts into {other} columns are not supported"),
            ));
        }
    };
    Ok(array)
}

/// Build a batch from `VALUES` rows, checking each against the table schema.
pub(crate) fn rows_to_batch(schema: &SchemaRef, rows: &[Vec<Literal>]) -> Result<RecordBatch> {
    let width = schema.fields().len();
    if let Some(row) = rows.iter().find(|row| row.len() != width) {
        return Err(Error::new(
            ErrorKind::SchemaMismatch,
            format!(
                "Cannot write {} values into a table with {width} columns",
                row.len()
            ),
        ));
    }

    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let values: Vec<&Literal> = rows.iter().map(|row| &row[idx]).collect();
            literal_column(field, &values)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}
