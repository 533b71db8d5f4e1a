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

//! Orchestration of a Spark session backed by an Iceberg catalog.
//!
//! The crate issues a fixed sequence of SQL and dataframe calls through an
//! [`Engine`]: namespace and table creation, Parquet and CSV ingestion,
//! table maintenance procedures and schema evolution.
//!
//! ```rust,ignore
//! let engine = LivyEngine::connect(livy_config, &SessionConfig::default()).await?;
//! let workflow = Workflow::new(WorkflowConfig::default())?;
//! let report = Session::new(engine).run(&workflow).await?;
//! ```

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod engine;
pub use engine::Engine;
pub mod ident;
pub use ident::{NamespaceRef, TableRef};
pub mod schema;
pub mod session;
pub use session::{BucketConfig, Session, SessionConfig};
pub mod source;
pub use source::{FileFormat, SourceFile};
pub mod statement;
pub use statement::Statement;
pub mod workflow;
pub use workflow::{Workflow, WorkflowConfig, WorkflowReport};
