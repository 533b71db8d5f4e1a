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

//! The lakehouse demo workflow.
//!
//! Steps run strictly in order against one engine session:
//! clean, create namespace, list namespaces, basic table, Parquet ingest,
//! CSV ingest through a staging view, monthly append, maintenance, schema
//! evolution and, when enabled, a final cleanup.

pub mod ops;

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::Engine;
use crate::ensure_data_valid;
use crate::error::{Error, ErrorKind, Result};
use crate::ident::{NamespaceRef, TableRef};
use crate::schema::{ColumnDef, ColumnType, Literal};
use crate::source::SourceFile;
use crate::statement::Statement;

/// Table created from literal rows.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BasicTableConfig {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Literal>>,
}

impl Default for BasicTableConfig {
    fn default() -> Self {
        let row = |id: i64, name: &str, age: i64, salary: i64| {
            vec![
                Literal::Integer(id),
                Literal::string(name),
                Literal::Integer(age),
                Literal::Decimal(Decimal::new(salary, 2)),
            ]
        };
        Self {
            name: "testTable".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("name", ColumnType::Varchar(10)),
                ColumnDef::new("age", ColumnType::Integer),
                ColumnDef::new("salary", ColumnType::Decimal {
                    precision: 10,
                    scale: 2,
                }),
            ],
            rows: vec![
                row(1, "Alan", 23, 340000),
                row(2, "Ben", 30, 550000),
                row(3, "Chen", 35, 650000),
            ],
        }
    }
}

/// Names, sources and tuning values of the workflow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub catalog: String,
    pub namespace: String,
    pub namespace_location: String,
    pub basic_table: BasicTableConfig,
    pub parquet_source: SourceFile,
    pub parquet_table: String,
    pub csv_source: SourceFile,
    pub csv_view: String,
    pub csv_table: String,
    /// Appended to the Parquet table in this order.
    pub monthly_sources: Vec<SourceFile>,
    pub target_file_size_bytes: u64,
    pub retain_last: u32,
    pub evolve_column: ColumnDef,
    /// Rows shown from `DESCRIBE TABLE` results.
    pub describe_rows: usize,
    /// Drop everything the workflow created before releasing the session.
    pub cleanup_on_exit: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            catalog: "lakehouse".to_string(),
            namespace: "localsparkdb".to_string(),
            namespace_location: "s3a://sourcebucket/".to_string(),
            basic_table: BasicTableConfig::default(),
            parquet_source: SourceFile::parquet("s3a://sourcebucket/yellow_tripdata_2022-01.parquet"),
            parquet_table: "yellow_taxi_2022".to_string(),
            csv_source: SourceFile::csv("s3a://sourcebucket/zipcodes.csv"),
            csv_view: "tempCSVTable".to_string(),
            csv_table: "zipcodes".to_string(),
            monthly_sources: (2..=6)
                .map(|month| {
                    SourceFile::parquet(format!(
                        "s3a://sourcebucket/yellow_tripdata_2022-{month:02}.parquet"
                    ))
                })
                .collect(),
            target_file_size_bytes: 209_715_200,
            retain_last: 1,
            evolve_column: ColumnDef::new("fare_per_mile", ColumnType::Double),
            describe_rows: 25,
            cleanup_on_exit: false,
        }
    }
}

/// `<format> <path>` for a dataframe read in the dry listing.
fn read_target(source: &SourceFile) -> String {
    match source.format() {
        Ok(format) => format!("{format} {source}"),
        Err(_) => source.to_string(),
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<()> {
        for (what, name) in [
            ("catalog", &self.catalog),
            ("namespace", &self.namespace),
            ("basic table", &self.basic_table.name),
            ("parquet table", &self.parquet_table),
            ("csv view", &self.csv_view),
            ("csv table", &self.csv_table),
        ] {
            ensure_data_valid!(is_identifier(name), "Invalid {} name '{}'", what, name);
        }
        if self.monthly_sources.is_empty() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "At least one monthly source is required",
            ));
        }
        ensure_data_valid!(
            self.target_file_size_bytes > 0,
            "target_file_size_bytes must be positive, got {}",
            self.target_file_size_bytes
        );
        Ok(())
    }

    pub fn namespace_ref(&self) -> NamespaceRef {
        NamespaceRef::new(self.catalog.clone(), self.namespace.clone())
    }

    pub fn basic_table_ref(&self) -> TableRef {
        self.namespace_ref().table(self.basic_table.name.clone())
    }

    pub fn parquet_table_ref(&self) -> TableRef {
        self.namespace_ref().table(self.parquet_table.clone())
    }

    pub fn csv_table_ref(&self) -> TableRef {
        self.namespace_ref().table(self.csv_table.clone())
    }

    /// Tables dropped by cleanup, in drop order.
    pub fn known_tables(&self) -> Vec<TableRef> {
        vec![
            self.basic_table_ref(),
            self.csv_table_ref(),
            self.parquet_table_ref(),
        ]
    }
}

/// What a workflow run observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowReport {
    pub namespaces: Vec<String>,
    pub basic_rows: usize,
    pub parquet_rows: u64,
    pub csv_rows: u64,
    pub appended_rows: u64,
    pub data_files_before_compaction: usize,
    pub data_files_after_compaction: usize,
    pub snapshots_before_expiry: usize,
    pub snapshots_after_expiry: usize,
    pub orphan_files_removed: Vec<String>,
    pub manifests_rewritten: u64,
    pub final_columns: Vec<String>,
    pub cleaned_up: bool,
}

/// One step of a dry listing.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedStep {
    /// Statement text sent as is.
    Sql(Statement),
    /// Statement whose text depends on an earlier result.
    Deferred(String),
    /// Dataframe call.
    Dataframe(String),
}

impl std::fmt::Display for PlannedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannedStep::Sql(statement) => write!(f, "{statement}"),
            PlannedStep::Deferred(text) => f.write_str(text),
            PlannedStep::Dataframe(text) => write!(f, "-- {text}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    config: WorkflowConfig,
}

impl Workflow {
    pub fn new(config: WorkflowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run every step against `engine`. The engine is not released.
    pub async fn run<E: Engine>(&self, engine: &mut E) -> Result<WorkflowReport> {
        let config = &self.config;
        let namespace = config.namespace_ref();
        let tables = config.known_tables();
        let basic = config.basic_table_ref();
        let taxi = config.parquet_table_ref();
        let mut report = WorkflowReport::default();

        info!(step = "clean_database", "Starting workflow");
        ops::clean_database(engine, &namespace, &tables).await?;

        info!(step = "create_database");
        ops::create_database(engine, &namespace, &config.namespace_location).await?;

        info!(step = "list_databases");
        report.namespaces = ops::list_databases(engine, &config.catalog).await?.collect();

        info!(step = "basic_table");
        let rows = ops::create_table_and_insert(
            engine,
            &basic,
            &config.basic_table.columns,
            &config.basic_table.rows,
        )
        .await?;
        report.basic_rows = rows.iter().map(|b| b.num_rows()).sum();

        info!(step = "parquet_ingest");
        report.parquet_rows = ops::load_external_file_as_table(
            engine,
            &config.parquet_source,
            &taxi,
            config.describe_rows,
        )
        .await?
        .rows;

        info!(step = "csv_ingest");
        report.csv_rows = ops::ingest_via_staging_view(
            engine,
            &config.csv_source,
            &config.csv_view,
            &config.csv_table_ref(),
            config.describe_rows,
        )
        .await?
        .rows;

        info!(step = "monthly_append");
        report.appended_rows = ops::append_batch_union(engine, &config.monthly_sources, &taxi).await?;

        info!(step = "maintenance");
        let compaction = ops::compact_files(engine, &taxi, config.target_file_size_bytes).await?;
        report.data_files_before_compaction = compaction.files_before;
        report.data_files_after_compaction = compaction.files_after;

        let expiry = ops::expire_snapshots(engine, &taxi, config.retain_last).await?;
        report.snapshots_before_expiry = expiry.snapshots_before;
        report.snapshots_after_expiry = expiry.snapshots_after;

        report.orphan_files_removed = ops::remove_orphan_files(engine, &taxi).await?;
        report.manifests_rewritten = ops::rewrite_manifests(engine, &taxi).await?;

        info!(step = "evolve_schema");
        report.final_columns =
            ops::evolve_schema(engine, &taxi, &config.evolve_column, config.describe_rows).await?;

        if config.cleanup_on_exit {
            info!(step = "cleanup");
            ops::clean_database(engine, &namespace, &tables).await?;
            report.cleaned_up = true;
        }

        info!("Workflow finished");
        Ok(report)
    }

    /// Steps the workflow issues, in order, without touching an engine.
    pub fn plan(&self) -> Vec<PlannedStep> {
        let config = &self.config;
        let namespace = config.namespace_ref();
        let basic = config.basic_table_ref();
        let taxi = config.parquet_table_ref();
        let zipcodes = config.csv_table_ref();

        let clean = || {
            let mut steps: Vec<PlannedStep> = config
                .known_tables()
                .into_iter()
                .map(|table| PlannedStep::Sql(Statement::DropTable { table }))
                .collect();
            steps.push(PlannedStep::Sql(Statement::DropNamespace {
                namespace: namespace.clone(),
            }));
            steps
        };

        let mut steps = clean();
        steps.extend([
            PlannedStep::Sql(Statement::CreateNamespace {
                namespace: namespace.clone(),
                location: config.namespace_location.clone(),
            }),
            PlannedStep::Sql(Statement::ShowNamespaces {
                catalog: config.catalog.clone(),
            }),
            PlannedStep::Sql(Statement::CreateTable {
                table: basic.clone(),
                columns: config.basic_table.columns.clone(),
            }),
            PlannedStep::Sql(Statement::InsertValues {
                table: basic.clone(),
                rows: config.basic_table.rows.clone(),
            }),
            PlannedStep::Sql(Statement::SelectAll { table: basic }),
            PlannedStep::Dataframe(format!(
                "read {} and writeTo({taxi}).create()",
                read_target(&config.parquet_source)
            )),
            PlannedStep::Sql(Statement::Describe {
                table: taxi.clone(),
            }),
            PlannedStep::Sql(Statement::Count {
                table: taxi.clone(),
            }),
            PlannedStep::Dataframe(format!(
                "read {} and createOrReplaceTempView({})",
                read_target(&config.csv_source),
                config.csv_view
            )),
            PlannedStep::Sql(Statement::CreateOrReplaceTableAsSelect {
                table: zipcodes.clone(),
                view: config.csv_view.clone(),
            }),
            PlannedStep::Sql(Statement::Describe {
                table: zipcodes.clone(),
            }),
            PlannedStep::Sql(Statement::SelectAll { table: zipcodes }),
            PlannedStep::Dataframe(format!(
                "read and union {} and insertInto({taxi})",
                config
                    .monthly_sources
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            PlannedStep::Sql(Statement::DataFiles {
                table: taxi.clone(),
            }),
            PlannedStep::Sql(Statement::RewriteDataFiles {
                table: taxi.clone(),
                target_file_size_bytes: config.target_file_size_bytes,
            }),
            PlannedStep::Sql(Statement::DataFiles {
                table: taxi.clone(),
            }),
            PlannedStep::Sql(Statement::Snapshots {
                table: taxi.clone(),
            }),
        ]);

        // The cutoff is the latest commit time read from the snapshots table.
        let placeholder = DateTime::UNIX_EPOCH;
        let expire = Statement::ExpireSnapshots {
            table: taxi.clone(),
            older_than: placeholder,
            retain_last: config.retain_last,
        }
        .to_string()
        .replace(
            &placeholder
                .format(crate::statement::TIMESTAMP_LITERAL_FORMAT)
                .to_string(),
            "<latest committed_at>",
        );
        steps.push(PlannedStep::Deferred(expire));

        steps.extend([
            PlannedStep::Sql(Statement::Snapshots {
                table: taxi.clone(),
            }),
            PlannedStep::Sql(Statement::RemoveOrphanFiles {
                table: taxi.clone(),
                older_than: None,
            }),
            PlannedStep::Sql(Statement::RewriteManifests {
                table: taxi.clone(),
            }),
            PlannedStep::Sql(Statement::AddColumn {
                table: taxi.clone(),
                column: config.evolve_column.clone(),
            }),
            PlannedStep::Sql(Statement::Describe { table: taxi }),
        ]);

        if config.cleanup_on_exit {
            steps.extend(clean());
        }
        steps
    }
}
