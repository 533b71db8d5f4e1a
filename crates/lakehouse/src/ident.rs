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

//! Fully-qualified namespace and table references.
//!
//! References are opaque keys into the external catalog. No schema or row
//! data is attached to them.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ensure_data_valid;
use crate::error::{Error, ErrorKind, Result};

/// `catalog.namespace`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceRef {
    pub catalog: String,
    pub namespace: String,
}

impl NamespaceRef {
    pub fn new(catalog: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            namespace: namespace.into(),
        }
    }

    /// Reference to a table inside this namespace.
    pub fn table(&self, name: impl Into<String>) -> TableRef {
        TableRef {
            catalog: self.catalog.clone(),
            namespace: self.namespace.clone(),
            name: name.into(),
        }
    }
}

impl Display for NamespaceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.catalog, self.namespace)
    }
}

/// `catalog.namespace.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub catalog: String,
    pub namespace: String,
    pub name: String,
}

impl TableRef {
    pub fn new(
        catalog: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn namespace_ref(&self) -> NamespaceRef {
        NamespaceRef::new(self.catalog.clone(), self.namespace.clone())
    }

    /// Catalog-relative identifier (`namespace.table`) as passed to
    /// `CALL <catalog>.system.*` procedures.
    pub fn procedure_arg(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Name of one of the table's metadata tables, e.g. `files` or
    /// `snapshots`.
    pub fn metadata_table(&self, kind: &str) -> String {
        format!("{self}.{kind}")
    }
}

impl Display for TableRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.namespace, self.name)
    }
}

impl FromStr for TableRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.contains("://") {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Unsupported table reference: {s}"),
            ));
        }

        let parts: Vec<&str> = s.split('.').collect();
        ensure_data_valid!(
            parts.len() == 3 && parts.iter().all(|p| !p.is_empty()),
            "Invalid table identifier '{}' (expected 'catalog.namespace.table')",
            s
        );

        Ok(TableRef::new(parts[0], parts[1], parts[2]))
    }
}

impl FromStr for NamespaceRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        ensure_data_valid!(
            parts.len() == 2 && parts.iter().all(|p| !p.is_empty()),
            "Invalid namespace identifier '{}' (expected 'catalog.namespace')",
            s
        );

        Ok(NamespaceRef::new(parts[0], parts[1]))
    }
}
