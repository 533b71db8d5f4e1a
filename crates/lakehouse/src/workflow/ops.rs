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

//! Individual workflow steps.
//!
//! Each step threads the engine explicitly and issues its statements in
//! order. Engine errors propagate unchanged.

use chrono::{DateTime, Utc};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::pretty::pretty_format_batches;
use tracing::{debug, info};

use crate::engine::{Engine, row_count, scalar_u64, string_column, timestamp_column};
use crate::error::{Error, ErrorKind, Result};
use crate::ident::{NamespaceRef, TableRef};
use crate::schema::{ColumnDef, Literal};
use crate::source::SourceFile;
use crate::statement::Statement;

/// First `limit` rows of a result, sliced without copying.
fn head(batches: &[RecordBatch], limit: usize) -> Vec<RecordBatch> {
    let mut remaining = limit;
    let mut shown = Vec::new();
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let take = batch.num_rows().min(remaining);
        shown.push(batch.slice(0, take));
        remaining -= take;
    }
    shown
}

/// Log up to `limit` rows of a result as a table. Returns the number of rows
/// shown.
pub fn show(title: &str, batches: &[RecordBatch], limit: usize) -> usize {
    let shown = head(batches, limit);
    match pretty_format_batches(&shown) {
        Ok(table) => info!("{title}\n{table}"),
        Err(e) => debug!(error = %e, "Failed to format result of {title}"),
    }
    row_count(&shown)
}

/// Drop the workflow's tables and then the namespace.
///
/// Every statement is existence-guarded, so this is a no-op on a clean
/// catalog.
pub async fn clean_database<E: Engine>(
    engine: &mut E,
    namespace: &NamespaceRef,
    tables: &[TableRef],
) -> Result<()> {
    for table in tables {
        engine
            .execute(&Statement::DropTable {
                table: table.clone(),
            })
            .await?;
    }
    engine
        .execute(&Statement::DropNamespace {
            namespace: namespace.clone(),
        })
        .await?;
    info!(namespace = %namespace, "Cleaned namespace");
    Ok(())
}

pub async fn create_database<E: Engine>(
    engine: &mut E,
    namespace: &NamespaceRef,
    location: &str,
) -> Result<()> {
    engine
        .execute(&Statement::CreateNamespace {
            namespace: namespace.clone(),
            location: location.to_string(),
        })
        .await?;
    info!(namespace = %namespace, location, "Created namespace");
    Ok(())
}

/// Namespace names returned by `SHOW DATABASES`, consumed once.
#[derive(Debug)]
pub struct NamespaceListing {
    names: std::vec::IntoIter<String>,
}

impl Iterator for NamespaceListing {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.names.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}

impl ExactSizeIterator for NamespaceListing {}

pub async fn list_databases<E: Engine>(engine: &mut E, catalog: &str) -> Result<NamespaceListing> {
    let batches = engine
        .execute(&Statement::ShowNamespaces {
            catalog: catalog.to_string(),
        })
        .await?;
    show("Namespaces", &batches, usize::MAX);

    let column = batches
        .first()
        .and_then(|b| b.schema().fields().first().map(|f| f.name().clone()))
        .unwrap_or_else(|| "namespace".to_string());
    let names = if batches.is_empty() {
        Vec::new()
    } else {
        string_column(&batches, &column)?
    };
    Ok(NamespaceListing {
        names: names.into_iter(),
    })
}

/// Create a table, insert literal rows and read them back.
pub async fn create_table_and_insert<E: Engine>(
    engine: &mut E,
    table: &TableRef,
    columns: &[ColumnDef],
    rows: &[Vec<Literal>],
) -> Result<Vec<RecordBatch>> {
    engine
        .execute(&Statement::CreateTable {
            table: table.clone(),
            columns: columns.to_vec(),
        })
        .await?;
    engine
        .execute(&Statement::InsertValues {
            table: table.clone(),
            rows: rows.to_vec(),
        })
        .await?;
    let batches = engine
        .execute(&Statement::SelectAll {
            table: table.clone(),
        })
        .await?;
    show(&format!("select * from {table}"), &batches, usize::MAX);
    Ok(batches)
}

/// Rows and description of a freshly ingested table.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub description: Vec<RecordBatch>,
    pub rows: u64,
}

async fn describe<E: Engine>(
    engine: &mut E,
    table: &TableRef,
    describe_rows: usize,
) -> Result<Vec<RecordBatch>> {
    let description = engine
        .execute(&Statement::Describe {
            table: table.clone(),
        })
        .await?;
    show(&format!("describe table {table}"), &description, describe_rows);
    Ok(description)
}

/// Read a file and create a new table from it.
pub async fn load_external_file_as_table<E: Engine>(
    engine: &mut E,
    source: &SourceFile,
    table: &TableRef,
    describe_rows: usize,
) -> Result<IngestSummary> {
    let frame = engine.read(source).await?;
    engine.write_to_create(frame, table).await?;
    let description = describe(engine, table, describe_rows).await?;

    let count = engine
        .execute(&Statement::Count {
            table: table.clone(),
        })
        .await?;
    let rows = scalar_u64(&count)?;
    info!(table = %table, source = %source, rows, "Created table from file");
    Ok(IngestSummary { description, rows })
}

/// Read a file, stage it as a temporary view and create or replace a table
/// from the view.
pub async fn ingest_via_staging_view<E: Engine>(
    engine: &mut E,
    source: &SourceFile,
    view: &str,
    table: &TableRef,
    describe_rows: usize,
) -> Result<IngestSummary> {
    let frame = engine.read(source).await?;
    engine.create_or_replace_temp_view(view, frame).await?;
    engine
        .execute(&Statement::CreateOrReplaceTableAsSelect {
            table: table.clone(),
            view: view.to_string(),
        })
        .await?;
    let description = describe(engine, table, describe_rows).await?;

    let batches = engine
        .execute(&Statement::SelectAll {
            table: table.clone(),
        })
        .await?;
    show(&format!("select * from {table}"), &batches, 20);
    let rows = row_count(&batches) as u64;
    info!(table = %table, view, rows, "Created table from staging view");
    Ok(IngestSummary { description, rows })
}

/// Union the sources in order and append the result to `table`.
///
/// Returns the number of appended rows.
pub async fn append_batch_union<E: Engine>(
    engine: &mut E,
    sources: &[SourceFile],
    table: &TableRef,
) -> Result<u64> {
    let Some((first, rest)) = sources.split_first() else {
        return Err(Error::new(
            ErrorKind::DataInvalid,
            "At least one source is required to append",
        )
        .with_context("table", table.to_string()));
    };

    let mut unioned = engine.read(first).await?;
    for source in rest {
        let frame = engine.read(source).await?;
        unioned = engine.union(unioned, frame).await?;
    }

    let rows = engine.count(&unioned).await?;
    engine.insert_into(unioned, table).await?;
    info!(table = %table, sources = sources.len(), rows, "Appended sources");
    Ok(rows)
}

async fn data_files<E: Engine>(engine: &mut E, table: &TableRef) -> Result<Vec<RecordBatch>> {
    let batches = engine
        .execute(&Statement::DataFiles {
            table: table.clone(),
        })
        .await?;
    show(&table.metadata_table("files"), &batches, 20);
    Ok(batches)
}

async fn snapshots<E: Engine>(engine: &mut E, table: &TableRef) -> Result<Vec<RecordBatch>> {
    let batches = engine
        .execute(&Statement::Snapshots {
            table: table.clone(),
        })
        .await?;
    show(&table.metadata_table("snapshots"), &batches, 20);
    Ok(batches)
}

/// Data file counts around a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionSummary {
    pub files_before: usize,
    pub files_after: usize,
}

/// Bin-pack small data files of `table` into files of about
/// `target_file_size_bytes`.
pub async fn compact_files<E: Engine>(
    engine: &mut E,
    table: &TableRef,
    target_file_size_bytes: u64,
) -> Result<CompactionSummary> {
    let files_before = row_count(&data_files(engine, table).await?);

    let result = engine
        .execute(&Statement::RewriteDataFiles {
            table: table.clone(),
            target_file_size_bytes,
        })
        .await?;
    show("rewrite_data_files", &result, usize::MAX);

    let files_after = row_count(&data_files(engine, table).await?);
    info!(table = %table, files_before, files_after, "Compacted data files");
    Ok(CompactionSummary {
        files_before,
        files_after,
    })
}

/// Snapshot counts around an expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirySummary {
    pub snapshots_before: usize,
    pub snapshots_after: usize,
    pub older_than: DateTime<Utc>,
}

/// Expire every snapshot committed before the latest one, keeping at least
/// `retain_last`.
pub async fn expire_snapshots<E: Engine>(
    engine: &mut E,
    table: &TableRef,
    retain_last: u32,
) -> Result<ExpirySummary> {
    let before = snapshots(engine, table).await?;
    let older_than = timestamp_column(&before, "committed_at")?
        .into_iter()
        .max()
        .ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("Table '{table}' has no snapshots to expire"),
            )
        })?;
    info!(table = %table, latest_committed_at = %older_than, "Expiring older snapshots");

    let result = engine
        .execute(&Statement::ExpireSnapshots {
            table: table.clone(),
            older_than,
            retain_last,
        })
        .await?;
    show("expire_snapshots", &result, usize::MAX);

    let after = snapshots(engine, table).await?;
    Ok(ExpirySummary {
        snapshots_before: row_count(&before),
        snapshots_after: row_count(&after),
        older_than,
    })
}

/// Delete files in the table location that no snapshot references.
///
/// Returns the removed file locations.
pub async fn remove_orphan_files<E: Engine>(engine: &mut E, table: &TableRef) -> Result<Vec<String>> {
    let result = engine
        .execute(&Statement::RemoveOrphanFiles {
            table: table.clone(),
            older_than: None,
        })
        .await?;
    show("remove_orphan_files", &result, usize::MAX);

    if result.is_empty() {
        return Ok(Vec::new());
    }
    string_column(&result, "orphan_file_location")
}

/// Consolidate the table's manifests. Returns the number rewritten.
pub async fn rewrite_manifests<E: Engine>(engine: &mut E, table: &TableRef) -> Result<u64> {
    let result = engine
        .execute(&Statement::RewriteManifests {
            table: table.clone(),
        })
        .await?;
    show("rewrite_manifests", &result, usize::MAX);

    if row_count(&result) == 0 {
        return Ok(0);
    }
    scalar_u64(&result)
}

/// Column names of a `DESCRIBE TABLE` result, without the partitioning and
/// detail sections Spark appends.
pub fn described_columns(description: &[RecordBatch]) -> Result<Vec<String>> {
    Ok(string_column(description, "col_name")?
        .into_iter()
        .take_while(|name| !name.is_empty() && !name.starts_with('#'))
        .collect())
}

/// Add a column and return the table's column names afterwards.
pub async fn evolve_schema<E: Engine>(
    engine: &mut E,
    table: &TableRef,
    column: &ColumnDef,
    describe_rows: usize,
) -> Result<Vec<String>> {
    engine
        .execute(&Statement::AddColumn {
            table: table.clone(),
            column: column.clone(),
        })
        .await?;
    let columns = described_columns(&describe(engine, table, describe_rows).await?)?;
    info!(table = %table, column = %column, "Added column");
    Ok(columns)
}
