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

//! Workflow runs against the in-process engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use datafusion::arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int32Array, Int64Array, StringArray};
use datafusion::arrow::datatypes::{DataType, Decimal128Type, Int32Type};
use datafusion::arrow::record_batch::RecordBatch;
use lakehouse::engine::memory::{MemoryEngine, MemoryFrame};
use lakehouse::engine::{Engine, row_count};
use lakehouse::schema::{ColumnDef, ColumnType};
use lakehouse::workflow::ops;
use lakehouse::{
    Error, ErrorKind, NamespaceRef, Result, Session, SourceFile, Statement, TableRef, Workflow,
    WorkflowConfig,
};

const JANUARY_ROWS: usize = 10;

fn trips(first_id: i32, rows: usize) -> RecordBatch {
    let ids: Vec<i32> = (first_id..first_id + rows as i32).collect();
    RecordBatch::try_from_iter([
        (
            "trip_id",
            Arc::new(Int32Array::from(ids.clone())) as ArrayRef,
        ),
        (
            "VendorID",
            Arc::new(Int32Array::from_iter_values(ids.iter().map(|id| id % 2 + 1))) as ArrayRef,
        ),
        (
            "trip_distance",
            Arc::new(Float64Array::from_iter_values(
                ids.iter().map(|id| *id as f64 * 0.5 + 1.0),
            )) as ArrayRef,
        ),
        (
            "fare_amount",
            Arc::new(Float64Array::from_iter_values(
                ids.iter().map(|id| 10.0 + *id as f64),
            )) as ArrayRef,
        ),
    ])
    .unwrap()
}

fn zipcodes() -> RecordBatch {
    RecordBatch::try_from_iter([
        (
            "Zipcode",
            Arc::new(Int64Array::from(vec![704, 709, 76166])) as ArrayRef,
        ),
        (
            "City",
            Arc::new(StringArray::from(vec!["PARC PARQUE", "CINGULAR WIRELESS", "FORT WORTH"]))
                as ArrayRef,
        ),
        (
            "State",
            Arc::new(StringArray::from(vec!["PR", "TX", "TX"])) as ArrayRef,
        ),
    ])
    .unwrap()
}

/// Rows per monthly source, keyed by the source path.
fn monthly_rows(config: &WorkflowConfig) -> BTreeMap<String, (i32, usize)> {
    config
        .monthly_sources
        .iter()
        .enumerate()
        .map(|(idx, source)| (source.path.clone(), ((idx as i32 + 2) * 100, idx + 5)))
        .collect()
}

fn memory_engine(config: &WorkflowConfig) -> MemoryEngine {
    let mut engine = MemoryEngine::new(config.catalog.clone()).with_bucket("sourcebucket");
    engine
        .register_source(config.parquet_source.path.clone(), trips(0, JANUARY_ROWS))
        .unwrap();
    engine
        .register_source(config.csv_source.path.clone(), zipcodes())
        .unwrap();
    for (path, (first_id, rows)) in monthly_rows(config) {
        engine.register_source(path, trips(first_id, rows)).unwrap();
    }
    engine
}

/// Delegates to [`MemoryEngine`], recording calls and injecting failures.
struct ProbeEngine {
    inner: MemoryEngine,
    namespace_absent_on_create: Vec<bool>,
    stops: Arc<AtomicUsize>,
    fail_statement: Option<&'static str>,
    fail_stop: bool,
}

impl ProbeEngine {
    fn new(inner: MemoryEngine) -> Self {
        Self {
            inner,
            namespace_absent_on_create: Vec::new(),
            stops: Arc::new(AtomicUsize::new(0)),
            fail_statement: None,
            fail_stop: false,
        }
    }
}

#[async_trait]
impl Engine for ProbeEngine {
    type Frame = MemoryFrame;

    async fn execute(&mut self, statement: &Statement) -> Result<Vec<RecordBatch>> {
        if let Statement::CreateNamespace { namespace, .. } = statement {
            self.namespace_absent_on_create
                .push(!self.inner.namespace_exists(namespace));
        }
        if self.fail_statement == Some(statement.name()) {
            return Err(Error::new(
                ErrorKind::Unexpected,
                format!("injected failure in {}", statement.name()),
            ));
        }
        self.inner.execute(statement).await
    }

    async fn read(&mut self, source: &SourceFile) -> Result<MemoryFrame> {
        self.inner.read(source).await
    }

    async fn union(&mut self, left: MemoryFrame, right: MemoryFrame) -> Result<MemoryFrame> {
        self.inner.union(left, right).await
    }

    async fn count(&mut self, frame: &MemoryFrame) -> Result<u64> {
        self.inner.count(frame).await
    }

    async fn create_or_replace_temp_view(&mut self, name: &str, frame: MemoryFrame) -> Result<()> {
        self.inner.create_or_replace_temp_view(name, frame).await
    }

    async fn write_to_create(&mut self, frame: MemoryFrame, table: &TableRef) -> Result<()> {
        self.inner.write_to_create(frame, table).await
    }

    async fn insert_into(&mut self, frame: MemoryFrame, table: &TableRef) -> Result<()> {
        self.inner.insert_into(frame, table).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(Error::new(ErrorKind::Connectivity, "engine unreachable"));
        }
        self.inner.stop().await
    }
}

#[tokio::test]
async fn test_full_workflow_report() {
    let config = WorkflowConfig::default();
    let appended: usize = monthly_rows(&config).values().map(|(_, rows)| rows).sum();
    let workflow = Workflow::new(config.clone()).unwrap();
    let mut session = Session::new(memory_engine(&config));

    let report = session.run(&workflow).await.unwrap();

    assert_eq!(report.namespaces, vec!["localsparkdb"]);
    assert_eq!(report.basic_rows, 3);
    assert_eq!(report.parquet_rows, JANUARY_ROWS as u64);
    assert_eq!(report.csv_rows, 3);
    assert_eq!(report.appended_rows, appended as u64);
    assert_eq!(report.data_files_before_compaction, 6);
    assert_eq!(report.data_files_after_compaction, 1);
    assert_eq!(report.snapshots_before_expiry, 3);
    assert_eq!(report.snapshots_after_expiry, 1);
    assert!(report.orphan_files_removed.is_empty());
    assert_eq!(report.manifests_rewritten, 0);
    assert_eq!(report.final_columns, vec![
        "trip_id",
        "VendorID",
        "trip_distance",
        "fare_amount",
        "fare_per_mile"
    ]);
    assert!(!report.cleaned_up);

    assert!(session.is_released());
    let engine = session.engine();
    assert!(engine.is_stopped());
    assert!(engine.table_exists(&config.parquet_table_ref()));
}

#[tokio::test]
async fn test_workflow_cleanup_on_exit() {
    let config = WorkflowConfig {
        cleanup_on_exit: true,
        ..Default::default()
    };
    let workflow = Workflow::new(config.clone()).unwrap();
    let mut session = Session::new(memory_engine(&config));

    let report = session.run(&workflow).await.unwrap();

    assert!(report.cleaned_up);
    assert!(!session.engine().namespace_exists(&config.namespace_ref()));
}

#[tokio::test]
async fn test_rerun_starts_from_clean_namespace() {
    let config = WorkflowConfig::default();
    let workflow = Workflow::new(config.clone()).unwrap();
    let mut engine = ProbeEngine::new(memory_engine(&config));

    let first = workflow.run(&mut engine).await.unwrap();
    let second = workflow.run(&mut engine).await.unwrap();

    assert_eq!(engine.namespace_absent_on_create, vec![true, true]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_literal_insert_reads_back_unchanged() {
    let config = WorkflowConfig::default();
    let mut engine = memory_engine(&config);
    ops::create_database(&mut engine, &config.namespace_ref(), &config.namespace_location)
        .await
        .unwrap();

    let batches = ops::create_table_and_insert(
        &mut engine,
        &config.basic_table_ref(),
        &config.basic_table.columns,
        &config.basic_table.rows,
    )
    .await
    .unwrap();

    let mut rows = Vec::new();
    for batch in &batches {
        let salary = batch.column_by_name("salary").unwrap();
        assert_eq!(salary.data_type(), &DataType::Decimal128(10, 2));
        let ids = batch.column_by_name("id").unwrap().as_primitive::<Int32Type>();
        let names = batch.column_by_name("name").unwrap().as_string::<i32>();
        let ages = batch.column_by_name("age").unwrap().as_primitive::<Int32Type>();
        let salaries = salary.as_primitive::<Decimal128Type>();
        for idx in 0..batch.num_rows() {
            rows.push((
                ids.value(idx),
                names.value(idx).to_string(),
                ages.value(idx),
                salaries.value(idx),
            ));
        }
    }
    rows.sort();

    assert_eq!(rows, vec![
        (1, "Alan".to_string(), 23, 340000),
        (2, "Ben".to_string(), 30, 550000),
        (3, "Chen".to_string(), 35, 650000),
    ]);
}

#[tokio::test]
async fn test_union_appends_every_source_row_once() {
    let config = WorkflowConfig::default();
    let mut engine = memory_engine(&config);
    let namespace = config.namespace_ref();
    let table = config.parquet_table_ref();

    ops::create_database(&mut engine, &namespace, &config.namespace_location)
        .await
        .unwrap();
    ops::load_external_file_as_table(&mut engine, &config.parquet_source, &table, 25)
        .await
        .unwrap();
    let rows = ops::append_batch_union(&mut engine, &config.monthly_sources, &table)
        .await
        .unwrap();

    let mut expected: Vec<i32> = (0..JANUARY_ROWS as i32).collect();
    let mut appended = 0;
    for (first_id, count) in monthly_rows(&config).into_values() {
        expected.extend(first_id..first_id + count as i32);
        appended += count;
    }
    assert_eq!(rows, appended as u64);

    let batches = engine
        .execute(&Statement::SelectAll { table })
        .await
        .unwrap();
    let mut ids: Vec<i32> = batches
        .iter()
        .flat_map(|b| {
            b.column_by_name("trip_id")
                .unwrap()
                .as_primitive::<Int32Type>()
                .values()
                .to_vec()
        })
        .collect();
    ids.sort();
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_append_requires_sources() {
    let config = WorkflowConfig::default();
    let mut engine = memory_engine(&config);
    let err = ops::append_batch_union(&mut engine, &[], &config.parquet_table_ref())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataInvalid);
}

#[tokio::test]
async fn test_append_rejects_mismatched_sources() {
    let config = WorkflowConfig::default();
    let mut engine = memory_engine(&config);
    let sources = vec![
        config.monthly_sources[0].clone(),
        config.csv_source.clone(),
    ];
    let err = ops::append_batch_union(&mut engine, &sources, &config.parquet_table_ref())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
}

#[tokio::test]
async fn test_expire_leaves_one_snapshot() {
    let config = WorkflowConfig::default();
    for snapshots in 1..=5 {
        let mut engine = memory_engine(&config);
        let table = config.parquet_table_ref();
        ops::create_database(&mut engine, &config.namespace_ref(), &config.namespace_location)
            .await
            .unwrap();
        ops::load_external_file_as_table(&mut engine, &config.parquet_source, &table, 25)
            .await
            .unwrap();
        for source in config.monthly_sources.iter().take(snapshots - 1) {
            ops::append_batch_union(&mut engine, std::slice::from_ref(source), &table)
                .await
                .unwrap();
        }
        assert_eq!(engine.snapshot_count(&table).unwrap(), snapshots);

        let summary = ops::expire_snapshots(&mut engine, &table, 1).await.unwrap();

        assert_eq!(summary.snapshots_before, snapshots);
        assert_eq!(summary.snapshots_after, 1, "starting from {snapshots}");
        assert_eq!(engine.snapshot_count(&table).unwrap(), 1);
    }
}

#[tokio::test]
async fn test_expire_without_table_fails() {
    let config = WorkflowConfig::default();
    let mut engine = memory_engine(&config);
    ops::create_database(&mut engine, &config.namespace_ref(), &config.namespace_location)
        .await
        .unwrap();

    let err = ops::expire_snapshots(&mut engine, &config.parquet_table_ref(), 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_evolve_schema_reads_new_column_as_null() {
    let config = WorkflowConfig::default();
    let mut engine = memory_engine(&config);
    let table = config.parquet_table_ref();
    ops::create_database(&mut engine, &config.namespace_ref(), &config.namespace_location)
        .await
        .unwrap();
    ops::load_external_file_as_table(&mut engine, &config.parquet_source, &table, 25)
        .await
        .unwrap();
    let before = engine
        .execute(&Statement::SelectAll {
            table: table.clone(),
        })
        .await
        .unwrap();

    let columns = ops::evolve_schema(&mut engine, &table, &config.evolve_column, 25)
        .await
        .unwrap();
    assert_eq!(columns.last().map(String::as_str), Some("fare_per_mile"));

    let after = engine
        .execute(&Statement::SelectAll {
            table: table.clone(),
        })
        .await
        .unwrap();
    assert_eq!(row_count(&after), row_count(&before));
    for (old, new) in before.iter().zip(after.iter()) {
        for idx in 0..old.num_columns() {
            assert_eq!(old.column(idx).as_ref(), new.column(idx).as_ref());
        }
        let added = new.column_by_name("fare_per_mile").unwrap();
        assert_eq!(added.null_count(), new.num_rows());
    }

    let err = ops::evolve_schema(
        &mut engine,
        &table,
        &ColumnDef::new("FARE_PER_MILE", ColumnType::Double),
        25,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
}

#[tokio::test]
async fn test_maintenance_removes_stale_orphans_only() {
    let config = WorkflowConfig::default();
    let mut engine = memory_engine(&config);
    let table = config.parquet_table_ref();
    ops::create_database(&mut engine, &config.namespace_ref(), &config.namespace_location)
        .await
        .unwrap();
    ops::load_external_file_as_table(&mut engine, &config.parquet_source, &table, 25)
        .await
        .unwrap();
    engine
        .add_stray_file(&table, "stale.parquet", Utc::now() - Duration::days(5))
        .unwrap();
    engine
        .add_stray_file(&table, "in-flight.parquet", Utc::now())
        .unwrap();

    let removed = ops::remove_orphan_files(&mut engine, &table).await.unwrap();

    assert_eq!(removed, vec![
        "s3a://sourcebucket/yellow_taxi_2022/data/stale.parquet"
    ]);
}

#[tokio::test]
async fn test_compaction_and_manifest_rewrite() {
    let config = WorkflowConfig::default();
    let mut engine = memory_engine(&config);
    let table = config.parquet_table_ref();
    ops::create_database(&mut engine, &config.namespace_ref(), &config.namespace_location)
        .await
        .unwrap();
    ops::load_external_file_as_table(&mut engine, &config.parquet_source, &table, 25)
        .await
        .unwrap();
    for source in &config.monthly_sources[..2] {
        ops::append_batch_union(&mut engine, std::slice::from_ref(source), &table)
            .await
            .unwrap();
    }

    assert_eq!(ops::rewrite_manifests(&mut engine, &table).await.unwrap(), 3);

    let summary = ops::compact_files(&mut engine, &table, config.target_file_size_bytes)
        .await
        .unwrap();
    assert_eq!(summary.files_before, 3);
    assert_eq!(summary.files_after, 1);
    assert_eq!(engine.data_file_count(&table).unwrap(), 1);
}

#[tokio::test]
async fn test_clean_database_is_idempotent() {
    let config = WorkflowConfig::default();
    let mut engine = memory_engine(&config);
    let namespace = NamespaceRef::new("lakehouse", "localsparkdb");

    for _ in 0..2 {
        ops::clean_database(&mut engine, &namespace, &config.known_tables())
            .await
            .unwrap();
    }
    ops::create_database(&mut engine, &namespace, &config.namespace_location)
        .await
        .unwrap();
    let listed: Vec<String> = ops::list_databases(&mut engine, "lakehouse")
        .await
        .unwrap()
        .collect();
    assert_eq!(listed, vec!["localsparkdb"]);
}

#[tokio::test]
async fn test_create_database_in_unreachable_location() {
    let config = WorkflowConfig::default();
    let mut engine = MemoryEngine::new("lakehouse");
    let err = ops::create_database(&mut engine, &config.namespace_ref(), "s3a://elsewhere/")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
}

#[tokio::test]
async fn test_session_released_once_on_failure() {
    let config = WorkflowConfig::default();
    let workflow = Workflow::new(config.clone()).unwrap();

    for failing in ["create_namespace", "rewrite_data_files", "add_column"] {
        let mut engine = ProbeEngine::new(memory_engine(&config));
        engine.fail_statement = Some(failing);
        let stops = engine.stops.clone();
        let mut session = Session::new(engine);

        let err = session.run(&workflow).await.unwrap_err();

        assert!(err.message().contains(failing), "{err}");
        assert_eq!(stops.load(Ordering::SeqCst), 1, "failing at {failing}");
        assert!(session.run(&workflow).await.is_err());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_workflow_error_wins_over_release_error() {
    let config = WorkflowConfig::default();
    let workflow = Workflow::new(config.clone()).unwrap();
    let mut engine = ProbeEngine::new(memory_engine(&config));
    engine.fail_statement = Some("show_namespaces");
    engine.fail_stop = true;
    let stops = engine.stops.clone();

    let err = Session::new(engine).run(&workflow).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unexpected);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_release_error_reported_after_success() {
    let config = WorkflowConfig::default();
    let workflow = Workflow::new(config.clone()).unwrap();
    let mut engine = ProbeEngine::new(memory_engine(&config));
    engine.fail_stop = true;

    let err = Session::new(engine).run(&workflow).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connectivity);
}
