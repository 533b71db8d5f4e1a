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

//! In-process engine keeping Iceberg-like tables in memory.
//!
//! Namespace, table and view names are case-insensitive, as in Spark.
//! Sources under `s3a://<bucket>/...` resolve to registered in-memory sources
//! first, then to a local directory configured as the bucket's root.

mod table;
mod values;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use datafusion::arrow::array::{ArrayRef, Int64Array, StringArray};
use datafusion::arrow::datatypes::{Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions, SessionContext};
use tracing::debug;

use self::table::{CommitClock, MemoryTable};
use self::values::{conform_by_position, nullable_schema, rebind, rows_to_batch};
use crate::engine::Engine;
use crate::error::{Error, ErrorKind, Result};
use crate::ident::{NamespaceRef, TableRef};
use crate::schema::ColumnDef;
use crate::source::{FileFormat, SourceFile};
use crate::statement::Statement;

/// Age in days below which `remove_orphan_files` keeps unreferenced files
/// when no `older_than` is given.
pub const DEFAULT_ORPHAN_FILE_AGE_DAYS: i64 = 3;

/// Record batches loaded from a source or a view.
#[derive(Debug, Clone)]
pub struct MemoryFrame {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl MemoryFrame {
    fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        let batches = batches
            .iter()
            .map(|batch| rebind(batch, &schema))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { schema, batches })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }
}

#[derive(Debug)]
struct MemoryNamespace {
    name: String,
    location: String,
    tables: BTreeMap<String, MemoryTable>,
}

/// In-process [`Engine`].
pub struct MemoryEngine {
    catalog: String,
    buckets: BTreeSet<String>,
    bucket_roots: HashMap<String, PathBuf>,
    sources: HashMap<String, MemoryFrame>,
    namespaces: BTreeMap<String, MemoryNamespace>,
    views: HashMap<String, MemoryFrame>,
    clock: CommitClock,
    ctx: SessionContext,
    stopped: bool,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn not_found(what: &str, name: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::NotFound, format!("{what} '{name}' not found"))
}

/// Split `s3a://bucket/key` into bucket and key.
fn split_bucket_path(path: &str) -> Option<(&str, &str)> {
    let rest = path
        .strip_prefix("s3a://")
        .or_else(|| path.strip_prefix("s3://"))?;
    Some(rest.split_once('/').unwrap_or((rest, "")))
}

impl MemoryEngine {
    /// Engine serving a single catalog with no configured buckets.
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            buckets: BTreeSet::new(),
            bucket_roots: HashMap::new(),
            sources: HashMap::new(),
            namespaces: BTreeMap::new(),
            views: HashMap::new(),
            clock: CommitClock::default(),
            ctx: SessionContext::new(),
            stopped: false,
        }
    }

    /// Mark a bucket as reachable. Namespaces may be located in it.
    pub fn with_bucket(mut self, name: impl Into<String>) -> Self {
        self.buckets.insert(name.into());
        self
    }

    /// Serve objects of `bucket` from a local directory.
    pub fn with_bucket_root(mut self, bucket: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let bucket = bucket.into();
        self.buckets.insert(bucket.clone());
        self.bucket_roots.insert(bucket, root.into());
        self
    }

    /// Serve `path` from memory instead of storage.
    pub fn register_source(&mut self, path: impl Into<String>, batch: RecordBatch) -> Result<()> {
        let schema = nullable_schema(&batch.schema());
        let frame = MemoryFrame::new(schema, vec![batch])?;
        self.sources.insert(path.into(), frame);
        Ok(())
    }

    /// Place an object in a table's location that no snapshot references.
    pub fn add_stray_file(
        &mut self,
        table: &TableRef,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_table(table, |table, _| {
            let path = format!("{}/data/{name}", table.location());
            table.add_stray_file(path, created_at);
            Ok(())
        })
    }

    pub fn namespace_exists(&self, namespace: &NamespaceRef) -> bool {
        self.namespaces.contains_key(&key(&namespace.namespace))
    }

    pub fn table_exists(&self, table: &TableRef) -> bool {
        self.table(table).is_ok()
    }

    pub fn snapshot_count(&self, table: &TableRef) -> Result<usize> {
        Ok(self.table(table)?.snapshots().len())
    }

    pub fn data_file_count(&self, table: &TableRef) -> Result<usize> {
        Ok(self.table(table)?.current_data_files().len())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "Session has already been stopped",
            ));
        }
        Ok(())
    }

    fn ensure_catalog(&self, catalog: &str) -> Result<()> {
        if !catalog.eq_ignore_ascii_case(&self.catalog) {
            return Err(not_found("Catalog", catalog));
        }
        Ok(())
    }

    fn namespace_mut(&mut self, namespace: &NamespaceRef) -> Result<&mut MemoryNamespace> {
        self.ensure_catalog(&namespace.catalog)?;
        self.namespaces
            .get_mut(&key(&namespace.namespace))
            .ok_or_else(|| not_found("Namespace", namespace))
    }

    fn table(&self, table: &TableRef) -> Result<&MemoryTable> {
        self.ensure_catalog(&table.catalog)?;
        self.namespaces
            .get(&key(&table.namespace))
            .and_then(|ns| ns.tables.get(&key(&table.name)))
            .ok_or_else(|| not_found("Table", table))
    }

    fn with_table<T>(
        &mut self,
        table: &TableRef,
        f: impl FnOnce(&mut MemoryTable, &mut CommitClock) -> Result<T>,
    ) -> Result<T> {
        self.ensure_catalog(&table.catalog)?;
        let Self {
            namespaces, clock, ..
        } = self;
        let stored = namespaces
            .get_mut(&key(&table.namespace))
            .and_then(|ns| ns.tables.get_mut(&key(&table.name)))
            .ok_or_else(|| not_found("Table", table))?;
        f(stored, clock)
    }

    fn view(&self, name: &str) -> Result<&MemoryFrame> {
        self.views
            .get(&key(name))
            .ok_or_else(|| not_found("View", name))
    }

    fn check_bucket(&self, bucket: &str) -> Result<()> {
        if !self.buckets.contains(bucket) {
            return Err(Error::new(
                ErrorKind::Connectivity,
                format!("Bucket '{bucket}' is not configured for this session"),
            ));
        }
        Ok(())
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        if let Some((bucket, object)) = split_bucket_path(path) {
            self.check_bucket(bucket)?;
            let root = self.bucket_roots.get(bucket).ok_or_else(|| {
                Error::new(
                    ErrorKind::Connectivity,
                    format!("Bucket '{bucket}' has no local root to read '{object}' from"),
                )
            })?;
            return Ok(root.join(object));
        }
        if path.starts_with("file://") {
            let url = url::Url::parse(path)?;
            return url.to_file_path().map_err(|_| {
                Error::new(
                    ErrorKind::DataInvalid,
                    format!("'{path}' is not a local file url"),
                )
            });
        }
        Ok(PathBuf::from(path))
    }

    async fn read_file(&self, path: &Path, format: FileFormat) -> Result<MemoryFrame> {
        if !path.is_file() {
            return Err(not_found("Source file", path.display()));
        }
        let location = path.to_string_lossy().to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();

        let df = match format {
            FileFormat::Parquet => {
                self.ctx
                    .read_parquet(location.as_str(), ParquetReadOptions {
                        file_extension: &extension,
                        ..Default::default()
                    })
                    .await?
            }
            FileFormat::Csv => {
                self.ctx
                    .read_csv(
                        location.as_str(),
                        CsvReadOptions::new()
                            .has_header(true)
                            .file_extension(&extension),
                    )
                    .await?
            }
        };
        let schema = nullable_schema(df.schema().inner());
        let batches = df.collect().await?;
        MemoryFrame::new(schema, batches)
    }

    async fn load(&self, source: &SourceFile) -> Result<MemoryFrame> {
        if let Some(frame) = self.sources.get(&source.path) {
            return Ok(frame.clone());
        }
        let format = source.format()?;
        let path = self.resolve_path(&source.path)?;
        self.read_file(&path, format)
            .await
            .map_err(|e| e.with_context("source", source.path.clone()))
    }

    fn create_namespace(&mut self, namespace: &NamespaceRef, location: &str) -> Result<()> {
        self.ensure_catalog(&namespace.catalog)?;
        if let Some((bucket, _)) = split_bucket_path(location) {
            self.check_bucket(bucket)?;
        }
        self.namespaces
            .entry(key(&namespace.namespace))
            .or_insert_with(|| MemoryNamespace {
                name: namespace.namespace.clone(),
                location: location.trim_end_matches('/').to_string(),
                tables: BTreeMap::new(),
            });
        Ok(())
    }

    /// Empty table for `table`, checking that its namespace exists and the
    /// name is free.
    fn new_table(&mut self, table: &TableRef, schema: SchemaRef) -> Result<MemoryTable> {
        let namespace = self.namespace_mut(&table.namespace_ref())?;
        if namespace.tables.contains_key(&key(&table.name)) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("Table '{table}' already exists"),
            ));
        }
        let location = format!("{}/{}", namespace.location, table.name);
        Ok(MemoryTable::new(location, schema))
    }

    fn store_table(&mut self, table: &TableRef, value: MemoryTable) -> Result<()> {
        let namespace = self.namespace_mut(&table.namespace_ref())?;
        namespace.tables.insert(key(&table.name), value);
        Ok(())
    }

    fn create_table_with_rows(&mut self, table: &TableRef, frame: MemoryFrame) -> Result<()> {
        let MemoryFrame { schema, batches } = frame;
        let mut created = self.new_table(table, schema)?;
        created.append(batches, &mut self.clock)?;
        self.store_table(table, created)
    }

    fn create_or_replace_table(&mut self, table: &TableRef, frame: MemoryFrame) -> Result<()> {
        if !self.table_exists(table) {
            return self.create_table_with_rows(table, frame);
        }
        let MemoryFrame { schema, batches } = frame;
        self.with_table(table, |stored, clock| stored.replace(schema, batches, clock))
    }

    fn insert_frame(&mut self, table: &TableRef, frame: MemoryFrame) -> Result<()> {
        self.with_table(table, |stored, clock| {
            let batches = frame
                .batches
                .iter()
                .map(|batch| conform_by_position(batch, stored.schema()))
                .collect::<Result<Vec<_>>>()?;
            stored.append(batches, clock)
        })
    }

    fn union_frames(left: MemoryFrame, right: MemoryFrame) -> Result<MemoryFrame> {
        let compatible = left.schema.fields().len() == right.schema.fields().len()
            && left
                .schema
                .fields()
                .iter()
                .zip(right.schema.fields().iter())
                .all(|(l, r)| l.data_type() == r.data_type());
        if !compatible {
            return Err(Error::new(
                ErrorKind::SchemaMismatch,
                "Union can only be performed on inputs with the same column types",
            )
            .with_context("left", left.schema.to_string())
            .with_context("right", right.schema.to_string()));
        }

        let MemoryFrame { schema, mut batches } = left;
        for batch in &right.batches {
            batches.push(rebind(batch, &schema)?);
        }
        Ok(MemoryFrame { schema, batches })
    }

    fn show_namespaces(&self, catalog: &str) -> Result<Vec<RecordBatch>> {
        self.ensure_catalog(catalog)?;
        let names = StringArray::from_iter_values(self.namespaces.values().map(|ns| ns.name.as_str()));
        Ok(vec![RecordBatch::try_from_iter([(
            "namespace",
            Arc::new(names) as ArrayRef,
        )])?])
    }

    fn count_batch(rows: usize) -> Result<Vec<RecordBatch>> {
        Ok(vec![RecordBatch::try_from_iter([(
            "count(1)",
            Arc::new(Int64Array::from(vec![rows as i64])) as ArrayRef,
        )])?])
    }

    fn create_empty_table(&mut self, table: &TableRef, columns: &[ColumnDef]) -> Result<()> {
        if self.table_exists(table) {
            return Ok(());
        }
        let schema = Arc::new(Schema::new(
            columns
                .iter()
                .map(ColumnDef::to_arrow_field)
                .collect::<Vec<_>>(),
        ));
        let created = self.new_table(table, schema)?;
        self.store_table(table, created)
    }

    fn drop_table(&mut self, table: &TableRef) -> Result<()> {
        self.ensure_catalog(&table.catalog)?;
        if let Some(namespace) = self.namespaces.get_mut(&key(&table.namespace)) {
            namespace.tables.remove(&key(&table.name));
        }
        Ok(())
    }

    fn drop_namespace(&mut self, namespace: &NamespaceRef) -> Result<()> {
        self.ensure_catalog(&namespace.catalog)?;
        self.namespaces.remove(&key(&namespace.namespace));
        Ok(())
    }

    async fn dispatch(&mut self, statement: &Statement) -> Result<Vec<RecordBatch>> {
        match statement {
            Statement::CreateNamespace {
                namespace,
                location,
            } => self.create_namespace(namespace, location)?,
            Statement::DropNamespace { namespace } => self.drop_namespace(namespace)?,
            Statement::ShowNamespaces { catalog } => return self.show_namespaces(catalog),
            Statement::CreateTable { table, columns } => self.create_empty_table(table, columns)?,
            Statement::InsertValues { table, rows } => self.with_table(table, |stored, clock| {
                let batch = rows_to_batch(stored.schema(), rows)?;
                stored.append(vec![batch], clock)
            })?,
            Statement::SelectAll { table } => return self.table(table)?.scan(),
            Statement::Count { table } => return Self::count_batch(self.table(table)?.row_count()),
            Statement::Describe { table } => return Ok(vec![self.table(table)?.describe()?]),
            Statement::DropTable { table } => self.drop_table(table)?,
            Statement::AddColumn { table, column } => self.with_table(table, |stored, _| {
                stored.add_column(column.to_arrow_field())
            })?,
            Statement::CreateOrReplaceTableAsSelect { table, view } => {
                let frame = self.view(view)?.clone();
                self.create_or_replace_table(table, frame)?
            }
            Statement::CreateTableFromView { table, view } => {
                let frame = self.view(view)?.clone();
                self.create_table_with_rows(table, frame)?
            }
            Statement::InsertFromView { table, view } => {
                let frame = self.view(view)?.clone();
                self.insert_frame(table, frame)?
            }
            Statement::CreateTempViewFromFile { view, path, format } => {
                let frame = self
                    .load(&SourceFile {
                        path: path.clone(),
                        format: Some(*format),
                    })
                    .await?;
                self.views.insert(key(view), frame);
            }
            Statement::CreateTempViewUnion { view, left, right } => {
                let left = self.view(left)?.clone();
                let right = self.view(right)?.clone();
                let frame = Self::union_frames(left, right)?;
                self.views.insert(key(view), frame);
            }
            Statement::CreateTempViewAlias { view, source } => {
                let frame = self.view(source)?.clone();
                self.views.insert(key(view), frame);
            }
            Statement::CountView { view } => return Self::count_batch(self.view(view)?.num_rows()),
            Statement::DataFiles { table } => return Ok(vec![self.table(table)?.files_table()?]),
            Statement::Snapshots { table } => {
                return Ok(vec![self.table(table)?.snapshots_table()?]);
            }
            Statement::RewriteDataFiles {
                table,
                target_file_size_bytes,
            } => {
                let result = self.with_table(table, |stored, clock| {
                    stored.rewrite_data_files(*target_file_size_bytes, clock)
                })?;
                return Ok(vec![result]);
            }
            Statement::ExpireSnapshots {
                table,
                older_than,
                retain_last,
            } => {
                let result = self.with_table(table, |stored, _| {
                    stored.expire_snapshots(*older_than, *retain_last)
                })?;
                return Ok(vec![result]);
            }
            Statement::RemoveOrphanFiles { table, older_than } => {
                let cutoff = older_than
                    .unwrap_or_else(|| Utc::now() - Duration::days(DEFAULT_ORPHAN_FILE_AGE_DAYS));
                let result =
                    self.with_table(table, |stored, _| stored.remove_orphan_files(cutoff))?;
                return Ok(vec![result]);
            }
            Statement::RewriteManifests { table } => {
                let result = self.with_table(table, |stored, clock| stored.rewrite_manifests(clock))?;
                return Ok(vec![result]);
            }
        }
        Ok(Vec::new())
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    type Frame = MemoryFrame;

    async fn execute(&mut self, statement: &Statement) -> Result<Vec<RecordBatch>> {
        self.ensure_running()?;
        debug!(statement = %statement, "Executing statement in memory");
        self.dispatch(statement).await
    }

    async fn read(&mut self, source: &SourceFile) -> Result<MemoryFrame> {
        self.ensure_running()?;
        self.load(source).await
    }

    async fn union(&mut self, left: MemoryFrame, right: MemoryFrame) -> Result<MemoryFrame> {
        self.ensure_running()?;
        Self::union_frames(left, right)
    }

    async fn count(&mut self, frame: &MemoryFrame) -> Result<u64> {
        self.ensure_running()?;
        Ok(frame.num_rows() as u64)
    }

    async fn create_or_replace_temp_view(&mut self, name: &str, frame: MemoryFrame) -> Result<()> {
        self.ensure_running()?;
        self.views.insert(key(name), frame);
        Ok(())
    }

    async fn write_to_create(&mut self, frame: MemoryFrame, table: &TableRef) -> Result<()> {
        self.ensure_running()?;
        self.create_table_with_rows(table, frame)
    }

    async fn insert_into(&mut self, frame: MemoryFrame, table: &TableRef) -> Result<()> {
        self.ensure_running()?;
        self.insert_frame(table, frame)
    }

    async fn stop(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.stopped = true;
        self.views.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use datafusion::arrow::array::{AsArray, Int32Array};
    use datafusion::arrow::datatypes::{DataType, Field, Int64Type};

    use super::*;
    use crate::engine::{row_count, scalar_u64, string_column};
    use crate::schema::{ColumnType, Literal};

    fn ns() -> NamespaceRef {
        NamespaceRef::new("lakehouse", "localsparkdb")
    }

    fn engine() -> MemoryEngine {
        MemoryEngine::new("lakehouse").with_bucket("sourcebucket")
    }

    fn trips(ids: Vec<i32>) -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("trip_id", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from(ids)) as ArrayRef],
        )
        .unwrap()
    }

    async fn engine_with_namespace() -> MemoryEngine {
        let mut engine = engine();
        engine
            .execute(&Statement::CreateNamespace {
                namespace: ns(),
                location: "s3a://sourcebucket/".to_string(),
            })
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_namespace_lifecycle() {
        let mut engine = engine_with_namespace().await;
        assert!(engine.namespace_exists(&ns()));

        let listed = engine
            .execute(&Statement::ShowNamespaces {
                catalog: "lakehouse".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(string_column(&listed, "namespace").unwrap(), vec![
            "localsparkdb"
        ]);

        for _ in 0..2 {
            engine
                .execute(&Statement::DropNamespace { namespace: ns() })
                .await
                .unwrap();
        }
        assert!(!engine.namespace_exists(&ns()));
    }

    #[tokio::test]
    async fn test_namespace_in_unconfigured_bucket() {
        let mut engine = MemoryEngine::new("lakehouse");
        let err = engine
            .execute(&Statement::CreateNamespace {
                namespace: ns(),
                location: "s3a://sourcebucket/".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[tokio::test]
    async fn test_unknown_catalog() {
        let mut engine = engine_with_namespace().await;
        let err = engine
            .execute(&Statement::SelectAll {
                table: TableRef::new("other", "localsparkdb", "t"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_literal_insert_and_select() {
        let mut engine = engine_with_namespace().await;
        let table = ns().table("testTable");
        engine
            .execute(&Statement::CreateTable {
                table: table.clone(),
                columns: vec![
                    ColumnDef::new("id", ColumnType::Integer),
                    ColumnDef::new("name", ColumnType::Varchar(10)),
                ],
            })
            .await
            .unwrap();
        engine
            .execute(&Statement::InsertValues {
                table: table.clone(),
                rows: vec![
                    vec![Literal::Integer(1), Literal::string("Alan")],
                    vec![Literal::Integer(2), Literal::string("Ben")],
                ],
            })
            .await
            .unwrap();

        // Names resolve case-insensitively.
        let rows = engine
            .execute(&Statement::SelectAll {
                table: ns().table("TESTTABLE"),
            })
            .await
            .unwrap();
        assert_eq!(row_count(&rows), 2);
        assert_eq!(string_column(&rows, "name").unwrap(), vec!["Alan", "Ben"]);

        let count = engine.execute(&Statement::Count { table }).await.unwrap();
        assert_eq!(scalar_u64(&count).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_write_to_create_existing_table() {
        let mut engine = engine_with_namespace().await;
        engine.register_source("mem://a", trips(vec![1, 2])).unwrap();
        let table = ns().table("trips");

        let frame = engine.read(&SourceFile::parquet("mem://a")).await.unwrap();
        engine.write_to_create(frame, &table).await.unwrap();
        assert_eq!(engine.snapshot_count(&table).unwrap(), 1);

        let frame = engine.read(&SourceFile::parquet("mem://a")).await.unwrap();
        let err = engine.write_to_create(frame, &table).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_write_to_create_missing_namespace() {
        let mut engine = engine();
        engine.register_source("mem://a", trips(vec![1])).unwrap();
        let frame = engine.read(&SourceFile::parquet("mem://a")).await.unwrap();
        let err = engine
            .write_to_create(frame, &ns().table("trips"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_union_and_insert() {
        let mut engine = engine_with_namespace().await;
        engine.register_source("mem://a", trips(vec![1, 2])).unwrap();
        engine.register_source("mem://b", trips(vec![3])).unwrap();
        let table = ns().table("trips");

        let a = engine.read(&SourceFile::parquet("mem://a")).await.unwrap();
        engine.write_to_create(a, &table).await.unwrap();

        let a = engine.read(&SourceFile::parquet("mem://a")).await.unwrap();
        let b = engine.read(&SourceFile::parquet("mem://b")).await.unwrap();
        let union = engine.union(a, b).await.unwrap();
        assert_eq!(engine.count(&union).await.unwrap(), 3);
        engine.insert_into(union, &table).await.unwrap();

        let count = engine
            .execute(&Statement::Count {
                table: table.clone(),
            })
            .await
            .unwrap();
        assert_eq!(count[0].column(0).as_primitive::<Int64Type>().value(0), 5);
        assert_eq!(engine.snapshot_count(&table).unwrap(), 2);
        assert_eq!(engine.data_file_count(&table).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_union_schema_mismatch() {
        let mut engine = engine();
        engine.register_source("mem://a", trips(vec![1])).unwrap();
        let other = RecordBatch::try_from_iter([(
            "zip",
            Arc::new(StringArray::from(vec!["10001"])) as ArrayRef,
        )])
        .unwrap();
        engine.register_source("mem://b", other).unwrap();

        let a = engine.read(&SourceFile::parquet("mem://a")).await.unwrap();
        let b = engine.read(&SourceFile::csv("mem://b")).await.unwrap();
        let err = engine.union(a, b).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[tokio::test]
    async fn test_view_statements() {
        let mut engine = engine_with_namespace().await;
        engine.register_source("mem://a", trips(vec![1, 2])).unwrap();
        let table = ns().table("trips");

        engine
            .execute(&Statement::CreateTempViewFromFile {
                view: "staged".to_string(),
                path: "mem://a".to_string(),
                format: FileFormat::Parquet,
            })
            .await
            .unwrap();
        engine
            .execute(&Statement::CreateTempViewUnion {
                view: "both".to_string(),
                left: "staged".to_string(),
                right: "STAGED".to_string(),
            })
            .await
            .unwrap();
        let count = engine
            .execute(&Statement::CountView {
                view: "both".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(scalar_u64(&count).unwrap(), 4);

        for _ in 0..2 {
            engine
                .execute(&Statement::CreateOrReplaceTableAsSelect {
                    table: table.clone(),
                    view: "both".to_string(),
                })
                .await
                .unwrap();
        }
        let count = engine
            .execute(&Statement::Count {
                table: table.clone(),
            })
            .await
            .unwrap();
        assert_eq!(scalar_u64(&count).unwrap(), 4);

        let err = engine
            .execute(&Statement::CreateTableFromView {
                table,
                view: "both".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_missing_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MemoryEngine::new("lakehouse").with_bucket_root("sourcebucket", dir.path());

        let err = engine
            .read(&SourceFile::parquet("s3a://sourcebucket/missing.parquet"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = engine
            .read(&SourceFile::parquet("s3a://otherbucket/a.parquet"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[tokio::test]
    async fn test_stop_once() {
        let mut engine = engine();
        engine.stop().await.unwrap();
        assert!(engine.is_stopped());
        assert!(engine.stop().await.is_err());
        assert!(
            engine
                .execute(&Statement::ShowNamespaces {
                    catalog: "lakehouse".to_string(),
                })
                .await
                .is_err()
        );
    }
}
