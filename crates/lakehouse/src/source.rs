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

//! External files that are read into transient record batches.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Reader used for a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Columnar Parquet file.
    Parquet,
    /// Delimited text with a header row.
    Csv,
}

impl FileFormat {
    /// Data source name understood by Spark's `USING` clause.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Parquet => "parquet",
            FileFormat::Csv => "csv",
        }
    }

    /// Infer the format from a path's extension.
    pub fn from_path(path: &str) -> Result<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".parquet") {
            Ok(FileFormat::Parquet)
        } else if lower.ends_with(".csv") {
            Ok(FileFormat::Csv)
        } else {
            Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Cannot infer file format from path '{path}', set 'format' explicitly"),
            ))
        }
    }
}

impl Display for FileFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object-storage path and the reader used to load it.
///
/// The header row is always required for [`FileFormat::Csv`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FileFormat>,
}

impl SourceFile {
    /// Source whose format is inferred from the extension when read.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: None,
        }
    }

    pub fn parquet(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: Some(FileFormat::Parquet),
        }
    }

    pub fn csv(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: Some(FileFormat::Csv),
        }
    }

    /// Explicit format, or the one implied by the extension.
    pub fn format(&self) -> Result<FileFormat> {
        match self.format {
            Some(format) => Ok(format),
            None => FileFormat::from_path(&self.path),
        }
    }
}

impl Display for SourceFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}
