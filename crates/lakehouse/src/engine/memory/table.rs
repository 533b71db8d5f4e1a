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

//! In-memory Iceberg-like table: data files, manifests and snapshots.
//!
//! Every write lands as one data file tracked by one new manifest and
//! commits a snapshot. Maintenance procedures follow the observable
//! contract of the Iceberg Spark procedures:
//!
//! - `rewrite_data_files` bin-packs files below the target size and rewrites
//!   each group of two or more files into one. Rows are unchanged.
//! - `expire_snapshots` drops snapshots older than the cutoff while keeping
//!   the `retain_last` most recent ones, then deletes files reachable only
//!   from dropped snapshots.
//! - `remove_orphan_files` deletes stored files referenced by no snapshot.
//! - `rewrite_manifests` folds the current manifests into one.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use datafusion::arrow::array::{ArrayRef, Int32Array, Int64Array, StringArray, TimestampMicrosecondArray};
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::{Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use uuid::Uuid;

use super::values::project_by_name;
use crate::error::{Error, ErrorKind, Result};
use crate::schema::describe_type_name;

/// Snapshot operation names as reported by the `snapshots` metadata table.
pub(crate) const OPERATION_APPEND: &str = "append";
pub(crate) const OPERATION_OVERWRITE: &str = "overwrite";
pub(crate) const OPERATION_REPLACE: &str = "replace";

/// Hands out snapshot ids and strictly increasing commit times.
#[derive(Debug, Default)]
pub(crate) struct CommitClock {
    last_snapshot_id: i64,
    last_commit: Option<DateTime<Utc>>,
}

impl CommitClock {
    pub(crate) fn next(&mut self) -> (i64, DateTime<Utc>) {
        let now = Utc::now();
        // Commit times are kept at microsecond precision so they survive a
        // round trip through a `TIMESTAMP '...'` literal.
        let now = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now);
        let committed_at = match self.last_commit {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_commit = Some(committed_at);
        self.last_snapshot_id += 1;
        (self.last_snapshot_id, committed_at)
    }
}

#[derive(Debug, Clone)]
struct DataFile {
    batch: RecordBatch,
    size_in_bytes: u64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Manifest {
    data_files: Vec<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub(crate) snapshot_id: i64,
    parent_id: Option<i64>,
    pub(crate) committed_at: DateTime<Utc>,
    pub(crate) operation: &'static str,
    manifest_list: String,
    manifests: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct MemoryTable {
    location: String,
    schema: SchemaRef,
    data_files: BTreeMap<String, DataFile>,
    manifests: BTreeMap<String, Manifest>,
    snapshots: Vec<Snapshot>,
    /// Objects in the table location that no metadata ever tracked, such as
    /// leftovers of failed writes.
    stray_files: BTreeMap<String, DateTime<Utc>>,
}

impl MemoryTable {
    pub(crate) fn new(location: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            location: location.into().trim_end_matches('/').to_string(),
            schema,
            data_files: BTreeMap::new(),
            manifests: BTreeMap::new(),
            snapshots: Vec::new(),
            stray_files: BTreeMap::new(),
        }
    }

    pub(crate) fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub(crate) fn location(&self) -> &str {
        &self.location
    }

    pub(crate) fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    fn current_snapshot(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Data files of the current snapshot, in manifest order.
    pub(crate) fn current_data_files(&self) -> Vec<&str> {
        let Some(snapshot) = self.current_snapshot() else {
            return Vec::new();
        };
        snapshot
            .manifests
            .iter()
            .filter_map(|path| self.manifests.get(path))
            .flat_map(|manifest| manifest.data_files.iter().map(String::as_str))
            .collect()
    }

    fn write_data_file(&mut self, batch: RecordBatch, created_at: DateTime<Utc>) -> String {
        let path = format!(
            "{}/data/{:05}-{}.parquet",
            self.location,
            self.data_files.len(),
            Uuid::new_v4()
        );
        let size_in_bytes = batch.get_array_memory_size() as u64;
        self.data_files.insert(path.clone(), DataFile {
            batch,
            size_in_bytes,
            created_at,
        });
        path
    }

    fn write_manifest(&mut self, data_files: Vec<String>, created_at: DateTime<Utc>) -> String {
        let path = format!("{}/metadata/{}-m0.avro", self.location, Uuid::new_v4());
        self.manifests.insert(path.clone(), Manifest {
            data_files,
            created_at,
        });
        path
    }

    fn commit(
        &mut self,
        clock: &mut CommitClock,
        operation: &'static str,
        build: impl FnOnce(&mut Self, DateTime<Utc>) -> Vec<String>,
    ) {
        let (snapshot_id, committed_at) = clock.next();
        let manifests = build(self, committed_at);
        let manifest_list = format!(
            "{}/metadata/snap-{snapshot_id}-1-{}.avro",
            self.location,
            Uuid::new_v4()
        );
        let parent_id = self.current_snapshot().map(|s| s.snapshot_id);
        self.snapshots.push(Snapshot {
            snapshot_id,
            parent_id,
            committed_at,
            operation,
            manifest_list,
            manifests,
        });
    }

    fn write_files(&mut self, batches: Vec<RecordBatch>, committed_at: DateTime<Utc>) -> Option<String> {
        let files: Vec<String> = batches
            .into_iter()
            .filter(|batch| batch.num_rows() > 0)
            .map(|batch| self.write_data_file(batch, committed_at))
            .collect();
        (!files.is_empty()).then(|| self.write_manifest(files, committed_at))
    }

    /// Append rows already matching the table schema. Each non-empty batch
    /// becomes one data file; all of them share one new manifest.
    pub(crate) fn append(&mut self, batches: Vec<RecordBatch>, clock: &mut CommitClock) -> Result<()> {
        if let Some(batch) = batches.iter().find(|b| b.schema() != self.schema) {
            return Err(Error::new(
                ErrorKind::SchemaMismatch,
                "Appended rows do not match the table schema",
            )
            .with_context("schema", batch.schema().to_string()));
        }
        let previous = self
            .current_snapshot()
            .map(|s| s.manifests.clone())
            .unwrap_or_default();

        self.commit(clock, OPERATION_APPEND, |table, committed_at| {
            let mut manifests = previous;
            manifests.extend(table.write_files(batches, committed_at));
            manifests
        });
        Ok(())
    }

    /// Replace the schema and contents, keeping history.
    pub(crate) fn replace(
        &mut self,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        clock: &mut CommitClock,
    ) -> Result<()> {
        if batches.iter().any(|b| b.schema() != schema) {
            return Err(Error::new(
                ErrorKind::SchemaMismatch,
                "Replacement rows do not match the new table schema",
            ));
        }
        self.schema = schema;
        self.commit(clock, OPERATION_OVERWRITE, |table, committed_at| {
            table.write_files(batches, committed_at).into_iter().collect()
        });
        Ok(())
    }

    /// All rows of the current snapshot, projected onto the current schema.
    pub(crate) fn scan(&self) -> Result<Vec<RecordBatch>> {
        self.current_data_files()
            .into_iter()
            .filter_map(|path| self.data_files.get(path))
            .map(|file| project_by_name(&file.batch, &self.schema))
            .collect()
    }

    pub(crate) fn row_count(&self) -> usize {
        self.current_data_files()
            .into_iter()
            .filter_map(|path| self.data_files.get(path))
            .map(|file| file.batch.num_rows())
            .sum()
    }

    /// Add a nullable column without touching existing data files.
    pub(crate) fn add_column(&mut self, field: Field) -> Result<()> {
        if self
            .schema
            .fields()
            .iter()
            .any(|f| f.name().eq_ignore_ascii_case(field.name()))
        {
            return Err(Error::new(
                ErrorKind::SchemaMismatch,
                format!("Column '{}' already exists", field.name()),
            ));
        }

        let mut fields: Vec<Field> = self
            .schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields.push(field.with_nullable(true));
        self.schema = Arc::new(Schema::new_with_metadata(
            fields,
            self.schema.metadata().clone(),
        ));
        Ok(())
    }

    pub(crate) fn add_stray_file(&mut self, path: String, created_at: DateTime<Utc>) {
        self.stray_files.insert(path, created_at);
    }

    fn referenced_by(&self, snapshots: &[Snapshot]) -> (HashSet<String>, HashSet<String>) {
        let mut manifests = HashSet::new();
        let mut data_files = HashSet::new();
        for snapshot in snapshots {
            for path in &snapshot.manifests {
                manifests.insert(path.clone());
                if let Some(manifest) = self.manifests.get(path) {
                    data_files.extend(manifest.data_files.iter().cloned());
                }
            }
        }
        (manifests, data_files)
    }

    /// `CALL system.rewrite_data_files`
    pub(crate) fn rewrite_data_files(
        &mut self,
        target_file_size_bytes: u64,
        clock: &mut CommitClock,
    ) -> Result<RecordBatch> {
        let current: Vec<String> = self
            .current_data_files()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut groups: Vec<Vec<String>> = Vec::new();
        let mut group: Vec<String> = Vec::new();
        let mut group_size = 0u64;
        for path in &current {
            let size = self.data_files.get(path).map_or(0, |f| f.size_in_bytes);
            if size >= target_file_size_bytes {
                continue;
            }
            if !group.is_empty() && group_size + size > target_file_size_bytes {
                groups.push(std::mem::take(&mut group));
                group_size = 0;
            }
            group.push(path.clone());
            group_size += size;
        }
        if !group.is_empty() {
            groups.push(group);
        }
        groups.retain(|g| g.len() > 1);

        let rewritten_count: usize = groups.iter().map(Vec::len).sum();
        let rewritten_bytes: u64 = groups
            .iter()
            .flatten()
            .filter_map(|path| self.data_files.get(path))
            .map(|f| f.size_in_bytes)
            .sum();
        let added_count = groups.len();

        if !groups.is_empty() {
            let mut merged = Vec::with_capacity(groups.len());
            for group in &groups {
                let batches = group
                    .iter()
                    .filter_map(|path| self.data_files.get(path))
                    .map(|f| project_by_name(&f.batch, &self.schema))
                    .collect::<Result<Vec<_>>>()?;
                merged.push(concat_batches(&self.schema, &batches)?);
            }

            self.commit(clock, OPERATION_REPLACE, |table, committed_at| {
                let mut files = Vec::with_capacity(current.len());
                let mut merged = merged.into_iter();
                for path in &current {
                    match groups.iter().position(|g| g.contains(path)) {
                        None => files.push(path.clone()),
                        Some(idx) if groups[idx][0] == *path => {
                            if let Some(batch) = merged.next() {
                                files.push(table.write_data_file(batch, committed_at));
                            }
                        }
                        Some(_) => {}
                    }
                }
                vec![table.write_manifest(files, committed_at)]
            });
        }

        Ok(RecordBatch::try_from_iter([
            (
                "rewritten_data_files_count",
                Arc::new(Int32Array::from(vec![rewritten_count as i32])) as ArrayRef,
            ),
            (
                "added_data_files_count",
                Arc::new(Int32Array::from(vec![added_count as i32])) as ArrayRef,
            ),
            (
                "rewritten_bytes_count",
                Arc::new(Int64Array::from(vec![rewritten_bytes as i64])) as ArrayRef,
            ),
            (
                "failed_data_files_count",
                Arc::new(Int32Array::from(vec![0])) as ArrayRef,
            ),
        ])?)
    }

    /// `CALL system.expire_snapshots`
    pub(crate) fn expire_snapshots(
        &mut self,
        older_than: DateTime<Utc>,
        retain_last: u32,
    ) -> Result<RecordBatch> {
        let keep_from = self
            .snapshots
            .len()
            .saturating_sub(retain_last.max(1) as usize);
        let (retained, expired): (Vec<_>, Vec<_>) = self
            .snapshots
            .drain(..)
            .enumerate()
            .partition(|(idx, snapshot)| *idx >= keep_from || snapshot.committed_at >= older_than);
        let expired: Vec<Snapshot> = expired.into_iter().map(|(_, s)| s).collect();
        self.snapshots = retained.into_iter().map(|(_, s)| s).collect();

        let (manifests_before, files_before) = self.referenced_by(&expired);
        let (manifests_after, files_after) = self.referenced_by(&self.snapshots);

        let mut deleted_files = 0i64;
        for path in files_before.difference(&files_after) {
            if self.data_files.remove(path).is_some() {
                deleted_files += 1;
            }
        }
        let mut deleted_manifests = 0i64;
        for path in manifests_before.difference(&manifests_after) {
            if self.manifests.remove(path).is_some() {
                deleted_manifests += 1;
            }
        }

        Ok(RecordBatch::try_from_iter([
            (
                "deleted_data_files_count",
                Arc::new(Int64Array::from(vec![deleted_files])) as ArrayRef,
            ),
            (
                "deleted_manifest_files_count",
                Arc::new(Int64Array::from(vec![deleted_manifests])) as ArrayRef,
            ),
            (
                "deleted_manifest_lists_count",
                Arc::new(Int64Array::from(vec![expired.len() as i64])) as ArrayRef,
            ),
        ])?)
    }

    /// `CALL system.remove_orphan_files`
    pub(crate) fn remove_orphan_files(&mut self, older_than: DateTime<Utc>) -> Result<RecordBatch> {
        let (manifests, data_files) = self.referenced_by(&self.snapshots);

        let mut orphans: Vec<String> = self
            .data_files
            .iter()
            .filter(|(path, f)| !data_files.contains(*path) && f.created_at < older_than)
            .map(|(path, _)| path.clone())
            .chain(
                self.manifests
                    .iter()
                    .filter(|(path, m)| !manifests.contains(*path) && m.created_at < older_than)
                    .map(|(path, _)| path.clone()),
            )
            .chain(
                self.stray_files
                    .iter()
                    .filter(|(_, created_at)| **created_at < older_than)
                    .map(|(path, _)| path.clone()),
            )
            .collect();
        orphans.sort();

        for path in &orphans {
            self.data_files.remove(path);
            self.manifests.remove(path);
            self.stray_files.remove(path);
        }

        Ok(RecordBatch::try_from_iter([(
            "orphan_file_location",
            Arc::new(StringArray::from(orphans)) as ArrayRef,
        )])?)
    }

    /// `CALL system.rewrite_manifests`
    pub(crate) fn rewrite_manifests(&mut self, clock: &mut CommitClock) -> Result<RecordBatch> {
        let current_manifests = self
            .current_snapshot()
            .map_or(0, |s| s.manifests.len());

        let (rewritten, added) = if current_manifests > 1 {
            let files: Vec<String> = self
                .current_data_files()
                .into_iter()
                .map(str::to_string)
                .collect();
            self.commit(clock, OPERATION_REPLACE, |table, committed_at| {
                vec![table.write_manifest(files, committed_at)]
            });
            (current_manifests as i32, 1)
        } else {
            (0, 0)
        };

        Ok(RecordBatch::try_from_iter([
            (
                "rewritten_manifests_count",
                Arc::new(Int32Array::from(vec![rewritten])) as ArrayRef,
            ),
            (
                "added_manifests_count",
                Arc::new(Int32Array::from(vec![added])) as ArrayRef,
            ),
        ])?)
    }

    /// Rows of the `files` metadata table.
    pub(crate) fn files_table(&self) -> Result<RecordBatch> {
        let files: Vec<(&str, i64)> = self
            .current_data_files()
            .into_iter()
            .filter_map(|path| {
                self.data_files
                    .get(path)
                    .map(|f| (path, f.size_in_bytes as i64))
            })
            .collect();

        Ok(RecordBatch::try_from_iter([
            (
                "file_path",
                Arc::new(StringArray::from_iter_values(files.iter().map(|(p, _)| *p))) as ArrayRef,
            ),
            (
                "file_size_in_bytes",
                Arc::new(Int64Array::from_iter_values(files.iter().map(|(_, s)| *s))) as ArrayRef,
            ),
        ])?)
    }

    /// Rows of the `snapshots` metadata table, oldest first.
    pub(crate) fn snapshots_table(&self) -> Result<RecordBatch> {
        let committed_at = TimestampMicrosecondArray::from_iter_values(
            self.snapshots.iter().map(|s| s.committed_at.timestamp_micros()),
        )
        .with_timezone("UTC");

        Ok(RecordBatch::try_from_iter([
            ("committed_at", Arc::new(committed_at) as ArrayRef),
            (
                "snapshot_id",
                Arc::new(Int64Array::from_iter_values(
                    self.snapshots.iter().map(|s| s.snapshot_id),
                )) as ArrayRef,
            ),
            (
                "parent_id",
                Arc::new(Int64Array::from_iter(
                    self.snapshots.iter().map(|s| s.parent_id),
                )) as ArrayRef,
            ),
            (
                "operation",
                Arc::new(StringArray::from_iter_values(
                    self.snapshots.iter().map(|s| s.operation),
                )) as ArrayRef,
            ),
            (
                "manifest_list",
                Arc::new(StringArray::from_iter_values(
                    self.snapshots.iter().map(|s| s.manifest_list.as_str()),
                )) as ArrayRef,
            ),
        ])?)
    }

    /// Rows of `DESCRIBE TABLE`.
    pub(crate) fn describe(&self) -> Result<RecordBatch> {
        let fields = self.schema.fields();
        Ok(RecordBatch::try_from_iter([
            (
                "col_name",
                Arc::new(StringArray::from_iter_values(fields.iter().map(|f| f.name().as_str())))
                    as ArrayRef,
            ),
            (
                "data_type",
                Arc::new(StringArray::from_iter_values(
                    fields.iter().map(|f| describe_type_name(f)),
                )) as ArrayRef,
            ),
            (
                "comment",
                Arc::new(StringArray::from(vec![None::<&str>; fields.len()])) as ArrayRef,
            ),
        ])?)
    }
}
