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

//! Error types for lakehouse operations.

use std::fmt::{Debug, Display, Formatter};

use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;

/// Result that is a wrapper of `Result<T, lakehouse::Error>`
pub type Result<T> = std::result::Result<T, Error>;

/// ErrorKind is all kinds of Error of lakehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The engine, a storage bucket, or the catalog could not be reached, or
    /// rejected the session configuration.
    Connectivity,
    /// A namespace, table, view or source file does not exist.
    NotFound,
    /// A namespace, table or view already exists.
    AlreadyExists,
    /// Schemas of two record sets disagree, or a column collides.
    SchemaMismatch,
    /// Input could not be parsed or violates a documented constraint.
    DataInvalid,
    /// The engine does not support the requested statement or option.
    FeatureUnsupported,
    /// Failure reported by the engine that fits no other kind.
    Unexpected,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::Connectivity => "Connectivity",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::DataInvalid => "DataInvalid",
            ErrorKind::FeatureUnsupported => "FeatureUnsupported",
            ErrorKind::Unexpected => "Unexpected",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

/// Error is the error struct returned by all lakehouse functions.
///
/// Engine failures are carried with the engine's own message. Context pairs
/// name the statement or object involved; they never replace the message.
pub struct Error {
    kind: ErrorKind,
    message: String,

    context: Vec<(&'static str, String)>,

    source: Option<anyhow::Error>,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            write!(
                f,
                "{}",
                self.context
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("source", &self.source);
            return de.finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "   {k}: {v}")?;
            }
        }
        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source: {source:#}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref())
    }
}

impl Error {
    /// Create a new Error with error kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::default(),
            source: None,
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Set source for error.
    ///
    /// # Notes
    ///
    /// If the source has been set, we will raise a panic here.
    pub fn with_source(mut self, src: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");

        self.source = Some(src.into());
        self
    }

    /// Return error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Return error's message.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

macro_rules! define_from_err {
    ($source: path, $error_kind: path, $msg: expr) => {
        impl std::convert::From<$source> for crate::error::Error {
            fn from(v: $source) -> Self {
                Self::new($error_kind, $msg).with_source(v)
            }
        }
    };
}

define_from_err!(
    std::io::Error,
    ErrorKind::Unexpected,
    "IO operation failed"
);

define_from_err!(
    serde_json::Error,
    ErrorKind::DataInvalid,
    "Failed to parse json payload"
);

define_from_err!(
    url::ParseError,
    ErrorKind::DataInvalid,
    "Failed to parse url"
);

define_from_err!(
    rust_decimal::Error,
    ErrorKind::DataInvalid,
    "Failed to convert decimal literal"
);

define_from_err!(
    reqwest::Error,
    ErrorKind::Connectivity,
    "Failed to send request to engine"
);

impl From<ArrowError> for Error {
    fn from(v: ArrowError) -> Self {
        let kind = match &v {
            ArrowError::SchemaError(_) | ArrowError::CastError(_) => ErrorKind::SchemaMismatch,
            _ => ErrorKind::Unexpected,
        };
        Error::new(kind, "Arrow operation failed").with_source(v)
    }
}

impl From<DataFusionError> for Error {
    fn from(v: DataFusionError) -> Self {
        let kind = match &v {
            DataFusionError::ObjectStore(_) | DataFusionError::IoError(_) => ErrorKind::NotFound,
            DataFusionError::SchemaError(_, _) => ErrorKind::SchemaMismatch,
            _ => ErrorKind::Unexpected,
        };
        Error::new(kind, "Failed to read source file").with_source(v)
    }
}

/// Helper macro to check arguments.
///
/// Example:
///
/// ```rust,ignore
/// ensure_data_valid!(a > 0, "{} is not positive.", a);
/// ```
#[macro_export]
macro_rules! ensure_data_valid {
    ($cond: expr, $fmt: literal, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::error::Error::new($crate::error::ErrorKind::DataInvalid, format!($fmt, $($arg)*)))
        }
    };
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    fn generate_error_with_backtrace_disabled() -> Error {
        Error::new(
            ErrorKind::NotFound,
            "TABLE_OR_VIEW_NOT_FOUND: lakehouse.localsparkdb.testTable",
        )
        .with_context("statement", "select * from lakehouse.localsparkdb.testTable")
        .with_source(anyhow!("engine reported failure"))
    }

    #[test]
    fn test_error_display() {
        let s = format!("{}", generate_error_with_backtrace_disabled());
        assert_eq!(
            s,
            "NotFound, context: { statement: select * from lakehouse.localsparkdb.testTable } => TABLE_OR_VIEW_NOT_FOUND: lakehouse.localsparkdb.testTable, source: engine reported failure"
        );
    }

    #[test]
    fn test_error_debug() {
        let s = format!("{:?}", generate_error_with_backtrace_disabled());
        assert_eq!(
            s,
            r#"NotFound => TABLE_OR_VIEW_NOT_FOUND: lakehouse.localsparkdb.testTable

Context:
   statement: select * from lakehouse.localsparkdb.testTable

Source: engine reported failure
"#
        );
    }

    #[test]
    fn test_arrow_schema_error_is_schema_mismatch() {
        let err: Error = ArrowError::SchemaError("fields differ".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }
}
