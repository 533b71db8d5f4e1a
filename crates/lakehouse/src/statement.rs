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

//! Typed SQL statements submitted to an engine.
//!
//! Every statement renders to the exact text Spark with the Iceberg runtime
//! expects. Engines that talk SQL send `statement.to_string()`; the
//! in-process engine dispatches on the variant instead.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};

use crate::ident::{NamespaceRef, TableRef};
use crate::schema::{ColumnDef, Literal};
use crate::source::FileFormat;

/// Table option key of `rewrite_data_files` controlling output file size.
pub const TARGET_FILE_SIZE_BYTES: &str = "target-file-size-bytes";

/// Layout of `TIMESTAMP '...'` literals. The offset is explicit so Spark does
/// not read the value in the session time zone.
pub const TIMESTAMP_LITERAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%:z";

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `create database if not exists <ns> LOCATION '<location>'`
    CreateNamespace {
        namespace: NamespaceRef,
        location: String,
    },
    /// `drop database if exists <ns> cascade`
    DropNamespace { namespace: NamespaceRef },
    /// `show databases from <catalog>`
    ShowNamespaces { catalog: String },
    /// `create table if not exists <t>(<cols>) using iceberg`
    CreateTable {
        table: TableRef,
        columns: Vec<ColumnDef>,
    },
    /// `insert into <t> values(...),(...)`
    InsertValues {
        table: TableRef,
        rows: Vec<Vec<Literal>>,
    },
    /// `select * from <t>`
    SelectAll { table: TableRef },
    /// `select count(*) from <t>`
    Count { table: TableRef },
    /// `describe table <t>`
    Describe { table: TableRef },
    /// `drop table if exists <t> purge`
    DropTable { table: TableRef },
    /// `ALTER TABLE <t> ADD COLUMN(<name> <type>)`
    AddColumn { table: TableRef, column: ColumnDef },
    /// `create or replace table <t> using iceberg as select * from <view>`
    CreateOrReplaceTableAsSelect { table: TableRef, view: String },
    /// `CREATE TABLE <t> USING iceberg AS SELECT * FROM <view>`
    CreateTableFromView { table: TableRef, view: String },
    /// `INSERT INTO <t> SELECT * FROM <view>`
    InsertFromView { table: TableRef, view: String },
    /// `CREATE OR REPLACE TEMPORARY VIEW <view> USING <format> OPTIONS (...)`
    CreateTempViewFromFile {
        view: String,
        path: String,
        format: FileFormat,
    },
    /// `CREATE OR REPLACE TEMPORARY VIEW <view> AS SELECT * FROM <l> UNION ALL SELECT * FROM <r>`
    CreateTempViewUnion {
        view: String,
        left: String,
        right: String,
    },
    /// `CREATE OR REPLACE TEMPORARY VIEW <view> AS SELECT * FROM <source>`
    CreateTempViewAlias { view: String, source: String },
    /// `SELECT count(*) FROM <view>`
    CountView { view: String },
    /// `SELECT file_path, file_size_in_bytes FROM <t>.files`
    DataFiles { table: TableRef },
    /// `SELECT committed_at, snapshot_id, parent_id, operation, manifest_list FROM <t>.snapshots`
    Snapshots { table: TableRef },
    /// `CALL <catalog>.system.rewrite_data_files(...)`
    RewriteDataFiles {
        table: TableRef,
        target_file_size_bytes: u64,
    },
    /// `CALL <catalog>.system.expire_snapshots(...)`
    ExpireSnapshots {
        table: TableRef,
        older_than: DateTime<Utc>,
        retain_last: u32,
    },
    /// `CALL <catalog>.system.remove_orphan_files(...)`
    RemoveOrphanFiles {
        table: TableRef,
        older_than: Option<DateTime<Utc>>,
    },
    /// `CALL <catalog>.system.rewrite_manifests(...)`
    RewriteManifests { table: TableRef },
}

impl Statement {
    /// Short name used in logs and error context.
    pub fn name(&self) -> &'static str {
        match self {
            Statement::CreateNamespace { .. } => "create_namespace",
            Statement::DropNamespace { .. } => "drop_namespace",
            Statement::ShowNamespaces { .. } => "show_namespaces",
            Statement::CreateTable { .. } => "create_table",
            Statement::InsertValues { .. } => "insert_values",
            Statement::SelectAll { .. } => "select_all",
            Statement::Count { .. } => "count",
            Statement::Describe { .. } => "describe",
            Statement::DropTable { .. } => "drop_table",
            Statement::AddColumn { .. } => "add_column",
            Statement::CreateOrReplaceTableAsSelect { .. } => "create_or_replace_table_as_select",
            Statement::CreateTableFromView { .. } => "create_table_from_view",
            Statement::InsertFromView { .. } => "insert_from_view",
            Statement::CreateTempViewFromFile { .. } => "create_temp_view_from_file",
            Statement::CreateTempViewUnion { .. } => "create_temp_view_union",
            Statement::CreateTempViewAlias { .. } => "create_temp_view_alias",
            Statement::CountView { .. } => "count_view",
            Statement::DataFiles { .. } => "data_files",
            Statement::Snapshots { .. } => "snapshots",
            Statement::RewriteDataFiles { .. } => "rewrite_data_files",
            Statement::ExpireSnapshots { .. } => "expire_snapshots",
            Statement::RemoveOrphanFiles { .. } => "remove_orphan_files",
            Statement::RewriteManifests { .. } => "rewrite_manifests",
        }
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn timestamp(value: &DateTime<Utc>) -> String {
    format!("TIMESTAMP '{}'", value.format(TIMESTAMP_LITERAL_FORMAT))
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Statement::CreateNamespace {
                namespace,
                location,
            } => write!(
                f,
                "create database if not exists {namespace} LOCATION {}",
                quote(location)
            ),
            Statement::DropNamespace { namespace } => {
                write!(f, "drop database if exists {namespace} cascade")
            }
            Statement::ShowNamespaces { catalog } => write!(f, "show databases from {catalog}"),
            Statement::CreateTable { table, columns } => {
                let columns = columns
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "create table if not exists {table}({columns}) using iceberg")
            }
            Statement::InsertValues { table, rows } => {
                let rows = rows
                    .iter()
                    .map(|row| {
                        let values = row
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(",");
                        format!("({values})")
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "insert into {table} values{rows}")
            }
            Statement::SelectAll { table } => write!(f, "select * from {table}"),
            Statement::Count { table } => write!(f, "select count(*) from {table}"),
            Statement::Describe { table } => write!(f, "describe table {table}"),
            Statement::DropTable { table } => write!(f, "drop table if exists {table} purge"),
            Statement::AddColumn { table, column } => {
                write!(f, "ALTER TABLE {table} ADD COLUMN({column})")
            }
            Statement::CreateOrReplaceTableAsSelect { table, view } => write!(
                f,
                "create or replace table {table} using iceberg as select * from {view}"
            ),
            Statement::CreateTableFromView { table, view } => {
                write!(f, "CREATE TABLE {table} USING iceberg AS SELECT * FROM {view}")
            }
            Statement::InsertFromView { table, view } => {
                write!(f, "INSERT INTO {table} SELECT * FROM {view}")
            }
            Statement::CreateTempViewFromFile { view, path, format } => write!(
                f,
                "CREATE OR REPLACE TEMPORARY VIEW {view} USING {format} OPTIONS (path {}, header 'true')",
                quote(path)
            ),
            Statement::CreateTempViewUnion { view, left, right } => write!(
                f,
                "CREATE OR REPLACE TEMPORARY VIEW {view} AS SELECT * FROM {left} UNION ALL SELECT * FROM {right}"
            ),
            Statement::CreateTempViewAlias { view, source } => write!(
                f,
                "CREATE OR REPLACE TEMPORARY VIEW {view} AS SELECT * FROM {source}"
            ),
            Statement::CountView { view } => write!(f, "SELECT count(*) FROM {view}"),
            Statement::DataFiles { table } => write!(
                f,
                "SELECT file_path, file_size_in_bytes FROM {}",
                table.metadata_table("files")
            ),
            Statement::Snapshots { table } => write!(
                f,
                "SELECT committed_at, snapshot_id, parent_id, operation, manifest_list FROM {}",
                table.metadata_table("snapshots")
            ),
            Statement::RewriteDataFiles {
                table,
                target_file_size_bytes,
            } => write!(
                f,
                "CALL {}.system.rewrite_data_files(table => {}, options => map({},{}))",
                table.catalog,
                quote(&table.procedure_arg()),
                quote(TARGET_FILE_SIZE_BYTES),
                quote(&target_file_size_bytes.to_string())
            ),
            Statement::ExpireSnapshots {
                table,
                older_than,
                retain_last,
            } => write!(
                f,
                "CALL {}.system.expire_snapshots(table => {},older_than => {},retain_last => {retain_last})",
                table.catalog,
                quote(&table.procedure_arg()),
                timestamp(older_than)
            ),
            Statement::RemoveOrphanFiles { table, older_than } => {
                write!(
                    f,
                    "CALL {}.system.remove_orphan_files(table => {}",
                    table.catalog,
                    quote(&table.procedure_arg())
                )?;
                if let Some(older_than) = older_than {
                    write!(f, ", older_than => {}", timestamp(older_than))?;
                }
                f.write_str(")")
            }
            Statement::RewriteManifests { table } => write!(
                f,
                "CALL {}.system.rewrite_manifests({})",
                table.catalog,
                quote(&table.procedure_arg())
            ),
        }
    }
}
