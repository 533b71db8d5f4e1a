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

//! Column definitions and SQL literals used by DDL and `INSERT ... VALUES`.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use datafusion::arrow::datatypes::{DataType, Field, TimeUnit};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Field metadata key carrying the declared `VARCHAR(n)` length.
pub const VARCHAR_LENGTH_META_KEY: &str = "lakehouse.varchar-length";

/// Column types accepted in `CREATE TABLE` and `ALTER TABLE ... ADD COLUMN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Double,
    String,
    Varchar(u32),
    Decimal { precision: u8, scale: i8 },
    Timestamp,
}

impl ColumnType {
    /// Arrow type the column is stored as.
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Integer => DataType::Int32,
            ColumnType::BigInt => DataType::Int64,
            ColumnType::Double => DataType::Float64,
            ColumnType::String | ColumnType::Varchar(_) => DataType::Utf8,
            ColumnType::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale),
            ColumnType::Timestamp => {
                DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::from("UTC")))
            }
        }
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Boolean => f.write_str("BOOLEAN"),
            ColumnType::Integer => f.write_str("INTEGER"),
            ColumnType::BigInt => f.write_str("BIGINT"),
            ColumnType::Double => f.write_str("DOUBLE"),
            ColumnType::String => f.write_str("STRING"),
            ColumnType::Varchar(len) => write!(f, "VARCHAR({len})"),
            ColumnType::Decimal { precision, scale } => write!(f, "DECIMAL({precision}, {scale})"),
            ColumnType::Timestamp => f.write_str("TIMESTAMP"),
        }
    }
}

fn parse_type_args(s: &str, name: &str) -> Result<Vec<u32>> {
    let inner = s
        .strip_prefix(name)
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Malformed column type '{s}'"),
            )
        })?;

    inner
        .split(',')
        .map(|arg| {
            arg.trim().parse::<u32>().map_err(|e| {
                Error::new(
                    ErrorKind::DataInvalid,
                    format!("Invalid type argument in '{s}'"),
                )
                .with_source(e)
            })
        })
        .collect()
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let parsed = match upper.as_str() {
            "BOOLEAN" => ColumnType::Boolean,
            "INT" | "INTEGER" => ColumnType::Integer,
            "BIGINT" | "LONG" => ColumnType::BigInt,
            "DOUBLE" => ColumnType::Double,
            "STRING" => ColumnType::String,
            "TIMESTAMP" => ColumnType::Timestamp,
            other if other.starts_with("VARCHAR") => match parse_type_args(other, "VARCHAR")?[..] {
                [len] if len > 0 => ColumnType::Varchar(len),
                _ => {
                    return Err(Error::new(
                        ErrorKind::DataInvalid,
                        format!("VARCHAR takes one positive length: '{s}'"),
                    ));
                }
            },
            other if other.starts_with("DECIMAL") => {
                match parse_type_args(other, "DECIMAL")?[..] {
                    [precision, scale] if (1..=38).contains(&precision) && scale <= precision => {
                        ColumnType::Decimal {
                            precision: precision as u8,
                            scale: scale as i8,
                        }
                    }
                    _ => {
                        return Err(Error::new(
                            ErrorKind::DataInvalid,
                            format!("DECIMAL takes precision (1-38) and scale: '{s}'"),
                        ));
                    }
                }
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::FeatureUnsupported,
                    format!("Unsupported column type '{s}'"),
                ));
            }
        };
        Ok(parsed)
    }
}

impl TryFrom<String> for ColumnType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

/// A named column, written as `name TYPE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnDef {
    pub name: String,
    pub data_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// Nullable arrow field for this column.
    pub fn to_arrow_field(&self) -> Field {
        let field = Field::new(&self.name, self.data_type.arrow_type(), true);
        match self.data_type {
            ColumnType::Varchar(len) => field.with_metadata(HashMap::from([(
                VARCHAR_LENGTH_META_KEY.to_string(),
                len.to_string(),
            )])),
            _ => field,
        }
    }
}

impl Display for ColumnDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)
    }
}

impl FromStr for ColumnDef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((name, data_type)) = s.trim().split_once(char::is_whitespace) else {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Column definition '{s}' must be 'name TYPE'"),
            ));
        };
        Ok(ColumnDef::new(name, data_type.parse()?))
    }
}

impl TryFrom<String> for ColumnDef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ColumnDef> for String {
    fn from(value: ColumnDef) -> Self {
        value.to_string()
    }
}

/// Declared `VARCHAR(n)` length of an arrow field, if any.
pub fn varchar_length(field: &Field) -> Option<usize> {
    field
        .metadata()
        .get(VARCHAR_LENGTH_META_KEY)
        .and_then(|v| v.parse().ok())
}

/// Type name of an arrow field as reported by `DESCRIBE TABLE`.
pub fn describe_type_name(field: &Field) -> String {
    if let Some(len) = varchar_length(field) {
        return format!("varchar({len})");
    }
    match field.data_type() {
        DataType::Boolean => "boolean".to_string(),
        DataType::Int32 => "int".to_string(),
        DataType::Int64 => "bigint".to_string(),
        DataType::Float64 => "double".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "string".to_string(),
        DataType::Decimal128(p, s) => format!("decimal({p},{s})"),
        DataType::Timestamp(_, Some(_)) => "timestamp".to_string(),
        DataType::Timestamp(_, None) => "timestamp_ntz".to_string(),
        other => other.to_string().to_ascii_lowercase(),
    }
}

/// A SQL literal in an `INSERT ... VALUES` row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Exact decimal; keeps its scale when rendered (`3400.00`).
    #[serde(skip_deserializing)]
    Decimal(Decimal),
}

impl Literal {
    pub fn string(value: impl Into<String>) -> Self {
        Literal::String(value.into())
    }

    /// Parse an exact decimal literal such as `3400.00`.
    pub fn decimal(value: &str) -> Result<Self> {
        Ok(Literal::Decimal(Decimal::from_str_exact(value)?))
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Boolean(v) => f.write_str(if *v { "TRUE" } else { "FALSE" }),
            Literal::Integer(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v:?}"),
            Literal::String(v) => write!(f, "'{}'", v.replace('\\', "\\\\").replace('\'', "\\'")),
            Literal::Decimal(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_round_trips_through_text() {
        for (input, expected) in [
            ("INTEGER", ColumnType::Integer),
            ("int", ColumnType::Integer),
            ("VARCHAR(10)", ColumnType::Varchar(10)),
            ("decimal(10, 2)", ColumnType::Decimal {
                precision: 10,
                scale: 2,
            }),
            ("double", ColumnType::Double),
        ] {
            assert_eq!(input.parse::<ColumnType>().unwrap(), expected, "{input}");
        }
        assert_eq!(
            ColumnType::Decimal {
                precision: 10,
                scale: 2
            }
            .to_string(),
            "DECIMAL(10, 2)"
        );
    }

    #[test]
    fn test_column_type_rejects_malformed() {
        assert_eq!(
            "VARCHAR()".parse::<ColumnType>().unwrap_err().kind(),
            ErrorKind::DataInvalid
        );
        assert_eq!(
            "DECIMAL(2, 5)".parse::<ColumnType>().unwrap_err().kind(),
            ErrorKind::DataInvalid
        );
        assert_eq!(
            "MAP<STRING, INT>".parse::<ColumnType>().unwrap_err().kind(),
            ErrorKind::FeatureUnsupported
        );
    }

    #[test]
    fn test_column_def_parse() {
        let column: ColumnDef = "fare_per_mile double".parse().unwrap();
        assert_eq!(column, ColumnDef::new("fare_per_mile", ColumnType::Double));
        assert_eq!(column.to_string(), "fare_per_mile DOUBLE");
        assert!("fare_per_mile".parse::<ColumnDef>().is_err());
    }

    #[test]
    fn test_varchar_length_survives_arrow_field() {
        let field = ColumnDef::new("name", ColumnType::Varchar(10)).to_arrow_field();
        assert_eq!(varchar_length(&field), Some(10));
        assert_eq!(describe_type_name(&field), "varchar(10)");
    }

    #[test]
    fn test_literal_rendering() {
        assert_eq!(Literal::Integer(1).to_string(), "1");
        assert_eq!(Literal::string("Alan").to_string(), "'Alan'");
        assert_eq!(Literal::string("O'Hare").to_string(), "'O\\'Hare'");
        assert_eq!(Literal::decimal("3400.00").unwrap().to_string(), "3400.00");
        assert_eq!(Literal::Float(3400.0).to_string(), "3400.0");
        assert_eq!(Literal::Null.to_string(), "NULL");
    }

    #[test]
    fn test_literal_from_yaml_scalars() {
        let row: Vec<Literal> = serde_json::from_str(r#"[1, "Alan", 23, 3400.5, null, true]"#).unwrap();
        assert_eq!(row, vec![
            Literal::Integer(1),
            Literal::string("Alan"),
            Literal::Integer(23),
            Literal::Float(3400.5),
            Literal::Null,
            Literal::Boolean(true),
        ]);
    }
}
