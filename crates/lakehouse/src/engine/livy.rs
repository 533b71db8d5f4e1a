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

//! Engine backed by a remote Spark cluster through the Apache Livy REST API.
//!
//! A Livy session of kind `sql` is started with the session's Spark
//! properties. Every call becomes one SQL statement; frames are temporary
//! views that live as long as the session.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datafusion::arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use datafusion::arrow::record_batch::RecordBatch;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use url::Url;

use crate::engine::{Engine, parse_timestamp_text, scalar_u64};
use crate::error::{Error, ErrorKind, Result};
use crate::ident::TableRef;
use crate::session::SessionConfig;
use crate::source::SourceFile;
use crate::statement::Statement;

const REQUESTED_BY_HEADER: &str = "X-Requested-By";
const JSON_MIME: &str = "application/json";
const FRAME_VIEW_PREFIX: &str = "lakehouse_frame";

/// Connection settings for a Livy server.
#[derive(Debug, Clone)]
pub struct LivyConfig {
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Timeout of each HTTP request.
    pub request_timeout: Duration,
    /// Interval between session and statement state polls.
    pub poll_interval: Duration,
    /// Maximum time for a new session to become idle.
    pub startup_timeout: Duration,
}

impl LivyConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            username: None,
            password: None,
            request_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            startup_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    kind: &'static str,
    name: &'a str,
    conf: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    id: i64,
    state: String,
}

#[derive(Debug, Serialize)]
struct SubmitStatementRequest {
    code: String,
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct StatementInfo {
    id: i64,
    state: String,
    #[serde(default)]
    output: Option<StatementOutput>,
}

#[derive(Debug, Deserialize)]
struct StatementOutput {
    status: String,
    #[serde(default)]
    data: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    ename: Option<String>,
    #[serde(default)]
    evalue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SqlResult {
    schema: SqlSchema,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SqlSchema {
    #[serde(default)]
    fields: Vec<SqlField>,
}

#[derive(Debug, Deserialize)]
struct SqlField {
    name: String,
    #[serde(rename = "type")]
    data_type: Value,
}

/// A temporary view holding a frame's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivyFrame {
    view: String,
}

impl LivyFrame {
    pub fn view(&self) -> &str {
        &self.view
    }
}

/// [`Engine`] talking to a Livy server.
pub struct LivyEngine {
    client: Client,
    config: LivyConfig,
    session_id: i64,
    next_frame: u64,
    stopped: bool,
}

impl LivyEngine {
    /// Start a `sql` session and wait until it accepts statements.
    pub async fn connect(config: LivyConfig, session: &SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let mut engine = Self {
            client,
            config,
            session_id: -1,
            next_frame: 0,
            stopped: false,
        };

        let request = CreateSessionRequest {
            kind: "sql",
            name: &session.app_name,
            conf: session.to_spark_conf(),
        };
        let url = engine.endpoint("sessions")?;
        let created: SessionInfo = engine.send(engine.client.post(url).json(&request)).await?;
        engine.session_id = created.id;
        info!(
            session_id = created.id,
            url = %engine.config.url,
            "Livy session created"
        );

        if let Err(e) = engine.wait_for_idle(created.state).await {
            // Nothing owns the session yet, so it is released here.
            engine.stopped = true;
            if let Err(delete_err) = engine.delete_session().await {
                warn!(
                    session_id = engine.session_id,
                    error = %delete_err,
                    "Failed to delete Livy session after startup failure"
                );
            }
            return Err(e);
        }
        Ok(engine)
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.config.url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(REQUESTED_BY_HEADER, "lakehouse");
        match &self.config.username {
            Some(username) => request.basic_auth(username, self.config.password.as_ref()),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = match status {
                StatusCode::NOT_FOUND => ErrorKind::NotFound,
                StatusCode::BAD_REQUEST => ErrorKind::DataInvalid,
                _ => ErrorKind::Connectivity,
            };
            return Err(Error::new(kind, format!("Livy returned {status}: {body}")));
        }
        Ok(response.json().await?)
    }

    async fn wait_for_idle(&self, mut state: String) -> Result<()> {
        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            match state.as_str() {
                "idle" => return Ok(()),
                "error" | "dead" | "killed" | "shutting_down" | "success" => {
                    return Err(Error::new(
                        ErrorKind::Connectivity,
                        format!("Livy session failed to start, state is '{state}'"),
                    )
                    .with_context("session_id", self.session_id.to_string()));
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(Error::new(
                    ErrorKind::Connectivity,
                    format!(
                        "Livy session did not become idle within {:?}",
                        self.config.startup_timeout
                    ),
                )
                .with_context("session_id", self.session_id.to_string()));
            }

            sleep(self.config.poll_interval).await;
            let url = self.endpoint(&format!("sessions/{}/state", self.session_id))?;
            let info: SessionInfo = self.send(self.client.get(url)).await?;
            state = info.state;
        }
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

    async fn submit(&self, statement: &Statement) -> Result<Vec<RecordBatch>> {
        self.ensure_running()?;
        let code = statement.to_string();
        debug!(statement = %code, "Submitting statement to Livy");

        let url = self.endpoint(&format!("sessions/{}/statements", self.session_id))?;
        let mut info: StatementInfo = self
            .send(self.client.post(url).json(&SubmitStatementRequest { code, kind: "sql" }))
            .await?;

        while matches!(info.state.as_str(), "waiting" | "running" | "cancelling") {
            sleep(self.config.poll_interval).await;
            let url = self.endpoint(&format!(
                "sessions/{}/statements/{}",
                self.session_id, info.id
            ))?;
            info = self.send(self.client.get(url)).await?;
        }

        if info.state != "available" {
            return Err(Error::new(
                ErrorKind::Unexpected,
                format!("Statement finished in state '{}'", info.state),
            )
            .with_context("statement", statement.name()));
        }
        let output = info.output.ok_or_else(|| {
            Error::new(ErrorKind::Unexpected, "Livy returned no statement output")
        })?;
        output_to_batches(output).map_err(|e| e.with_context("statement", statement.name()))
    }

    async fn delete_session(&self) -> Result<()> {
        let url = self.endpoint(&format!("sessions/{}", self.session_id))?;
        let response = self.authorize(self.client.delete(url)).send().await?;
        let status = response.status();
        // The session may already be gone after a cluster-side timeout.
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(Error::new(
                ErrorKind::Connectivity,
                format!("Failed to delete Livy session, server returned {status}"),
            )
            .with_context("session_id", self.session_id.to_string()));
        }
        info!(session_id = self.session_id, "Livy session deleted");
        Ok(())
    }

    fn next_view(&mut self) -> String {
        self.next_frame += 1;
        format!("{FRAME_VIEW_PREFIX}_{}", self.next_frame)
    }
}

/// Error kind for a Spark exception message.
fn classify(message: &str) -> ErrorKind {
    const NOT_FOUND: [&str; 5] = [
        "TABLE_OR_VIEW_NOT_FOUND",
        "SCHEMA_NOT_FOUND",
        "NoSuchTableException",
        "NoSuchNamespaceException",
        "PATH_NOT_FOUND",
    ];
    const SCHEMA_MISMATCH: [&str; 4] = [
        "FIELDS_ALREADY_EXISTS",
        "NUM_COLUMNS_MISMATCH",
        "INCOMPATIBLE_COLUMN_TYPE",
        "INSERT_COLUMN_ARITY_MISMATCH",
    ];

    if NOT_FOUND.iter().any(|p| message.contains(p)) {
        ErrorKind::NotFound
    } else if SCHEMA_MISMATCH.iter().any(|p| message.contains(p)) {
        ErrorKind::SchemaMismatch
    } else if message.contains("already exists") || message.contains("ALREADY_EXISTS") {
        ErrorKind::AlreadyExists
    } else if message.contains("AccessDenied")
        || message.contains("UnknownHostException")
        || message.contains("Connection refused")
    {
        ErrorKind::Connectivity
    } else {
        ErrorKind::Unexpected
    }
}

fn output_to_batches(output: StatementOutput) -> Result<Vec<RecordBatch>> {
    if output.status != "ok" {
        let message = output
            .evalue
            .unwrap_or_else(|| format!("Statement failed with status '{}'", output.status));
        let mut error = Error::new(classify(&message), message);
        if let Some(ename) = output.ename {
            error = error.with_context("exception", ename);
        }
        return Err(error);
    }

    let Some(result) = output.data.and_then(|mut data| data.remove(JSON_MIME)) else {
        return Ok(Vec::new());
    };
    let result: SqlResult = serde_json::from_value(result)?;
    if result.schema.fields.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![sql_result_to_batch(result)?])
}

fn arrow_type(spark_type: &Value) -> DataType {
    match spark_type.as_str() {
        Some("integer" | "short" | "byte") => DataType::Int32,
        Some("long") => DataType::Int64,
        Some("double" | "float") => DataType::Float64,
        Some("boolean") => DataType::Boolean,
        Some("timestamp") => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        _ => DataType::Utf8,
    }
}

fn invalid_value(field: &str, value: &Value) -> Error {
    Error::new(
        ErrorKind::DataInvalid,
        format!("Unexpected value {value} in result column '{field}'"),
    )
}

fn column_values<T>(
    rows: &[Vec<Value>],
    idx: usize,
    field: &str,
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>> {
    rows.iter()
        .map(|row| match row.get(idx) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => convert(value)
                .map(Some)
                .ok_or_else(|| invalid_value(field, value)),
        })
        .collect()
}

fn timestamp_micros(value: &Value) -> Option<i64> {
    match value {
        // Spark serializes timestamps as epoch milliseconds.
        Value::Number(n) => n.as_i64().map(|millis| millis * 1000),
        Value::String(s) => parse_timestamp_text(s).map(|ts| ts.timestamp_micros()),
        _ => None,
    }
}

fn sql_result_to_batch(result: SqlResult) -> Result<RecordBatch> {
    let SqlResult { schema, data } = result;
    let mut fields = Vec::with_capacity(schema.fields.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields.len());

    for (idx, field) in schema.fields.iter().enumerate() {
        let data_type = arrow_type(&field.data_type);
        let name = field.name.as_str();
        let column: ArrayRef = match &data_type {
            DataType::Int32 => Arc::new(Int32Array::from(column_values(&data, idx, name, |v| {
                v.as_i64().and_then(|v| i32::try_from(v).ok())
            })?)),
            DataType::Int64 => Arc::new(Int64Array::from(column_values(
                &data,
                idx,
                name,
                Value::as_i64,
            )?)),
            DataType::Float64 => Arc::new(Float64Array::from(column_values(
                &data,
                idx,
                name,
                Value::as_f64,
            )?)),
            DataType::Boolean => Arc::new(BooleanArray::from(column_values(
                &data,
                idx,
                name,
                Value::as_bool,
            )?)),
            DataType::Timestamp(_, _) => Arc::new(
                TimestampMicrosecondArray::from(column_values(
                    &data,
                    idx,
                    name,
                    timestamp_micros,
                )?)
                .with_timezone("UTC"),
            ),
            _ => Arc::new(StringArray::from(column_values(&data, idx, name, |v| {
                Some(match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            })?)),
        };
        fields.push(Field::new(name, data_type, true));
        columns.push(column);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

#[async_trait]
impl Engine for LivyEngine {
    type Frame = LivyFrame;

    async fn execute(&mut self, statement: &Statement) -> Result<Vec<RecordBatch>> {
        self.submit(statement).await
    }

    async fn read(&mut self, source: &SourceFile) -> Result<LivyFrame> {
        let view = self.next_view();
        self.submit(&Statement::CreateTempViewFromFile {
            view: view.clone(),
            path: source.path.clone(),
            format: source.format()?,
        })
        .await?;
        Ok(LivyFrame { view })
    }

    async fn union(&mut self, left: LivyFrame, right: LivyFrame) -> Result<LivyFrame> {
        let view = self.next_view();
        self.submit(&Statement::CreateTempViewUnion {
            view: view.clone(),
            left: left.view,
            right: right.view,
        })
        .await?;
        Ok(LivyFrame { view })
    }

    async fn count(&mut self, frame: &LivyFrame) -> Result<u64> {
        let batches = self
            .submit(&Statement::CountView {
                view: frame.view.clone(),
            })
            .await?;
        scalar_u64(&batches)
    }

    async fn create_or_replace_temp_view(&mut self, name: &str, frame: LivyFrame) -> Result<()> {
        self.submit(&Statement::CreateTempViewAlias {
            view: name.to_string(),
            source: frame.view,
        })
        .await?;
        Ok(())
    }

    async fn write_to_create(&mut self, frame: LivyFrame, table: &TableRef) -> Result<()> {
        self.submit(&Statement::CreateTableFromView {
            table: table.clone(),
            view: frame.view,
        })
        .await?;
        Ok(())
    }

    async fn insert_into(&mut self, frame: LivyFrame, table: &TableRef) -> Result<()> {
        self.submit(&Statement::InsertFromView {
            table: table.clone(),
            view: frame.view,
        })
        .await?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.stopped = true;
        self.delete_session().await
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;

    use datafusion::arrow::array::{Array, AsArray};
    use datafusion::arrow::datatypes::{Int32Type, Int64Type, TimestampMicrosecondType};
    use serde_json::json;

    use super::*;
    use crate::engine::{string_column, timestamp_column};

    fn output(value: Value) -> StatementOutput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_select_output_to_batches() {
        let batches = output_to_batches(output(json!({
            "status": "ok",
            "execution_count": 2,
            "data": {
                "application/json": {
                    "schema": {
                        "type": "struct",
                        "fields": [
                            {"name": "id", "type": "integer", "nullable": true, "metadata": {}},
                            {"name": "name", "type": "varchar(10)", "nullable": true, "metadata": {}},
                            {"name": "salary", "type": "decimal(10,2)", "nullable": true, "metadata": {}},
                            {"name": "rows", "type": "long", "nullable": false, "metadata": {}}
                        ]
                    },
                    "data": [[1, "Alan", 3400.00, 10], [2, null, 5500.5, 20]]
                }
            }
        })))
        .unwrap();

        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column(0).as_primitive::<Int32Type>().value(1), 2);
        assert!(batch.column(1).is_null(1));
        assert_eq!(string_column(&batches, "salary").unwrap(), vec!["3400.0", "5500.5"]);
        assert_eq!(batch.column(3).as_primitive::<Int64Type>().value(0), 10);
    }

    #[test]
    fn test_timestamp_output() {
        let batches = output_to_batches(output(json!({
            "status": "ok",
            "data": {
                "application/json": {
                    "schema": {"fields": [{"name": "committed_at", "type": "timestamp"}]},
                    "data": [[1709288130123i64], ["2024-03-01 10:15:30.123456"]]
                }
            }
        })))
        .unwrap();

        let column = batches[0].column(0).as_primitive::<TimestampMicrosecondType>();
        assert_eq!(column.value(0), 1_709_288_130_123_000);
        let times = timestamp_column(&batches, "committed_at").unwrap();
        assert_eq!(
            times[1].format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            "2024-03-01 10:15:30.123456"
        );
    }

    #[test]
    fn test_ddl_output_has_no_batches() {
        let batches = output_to_batches(output(json!({
            "status": "ok",
            "data": {
                "application/json": {"schema": {"type": "struct", "fields": []}, "data": []}
            }
        })))
        .unwrap();
        assert!(batches.is_empty());

        let batches = output_to_batches(output(json!({"status": "ok", "data": {}}))).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_error_output_keeps_engine_message() {
        let message = "[TABLE_OR_VIEW_NOT_FOUND] The table or view `lakehouse`.`localsparkdb`.`testTable` cannot be found.";
        let err = output_to_batches(output(json!({
            "status": "error",
            "ename": "org.apache.spark.sql.AnalysisException",
            "evalue": message,
            "traceback": []
        })))
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), message);
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("Namespace 'localsparkdb' already exists"),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            classify("[FIELDS_ALREADY_EXISTS] Cannot add column, because `fare_per_mile` already exists"),
            ErrorKind::SchemaMismatch
        );
        assert_eq!(
            classify("[NUM_COLUMNS_MISMATCH] UNION can only be performed on inputs with the same number of columns"),
            ErrorKind::SchemaMismatch
        );
        assert_eq!(
            classify("[PATH_NOT_FOUND] Path does not exist: s3a://sourcebucket/missing.parquet"),
            ErrorKind::NotFound
        );
        assert_eq!(classify("java.lang.OutOfMemoryError"), ErrorKind::Unexpected);
    }

    #[test]
    fn test_config_defaults() {
        let config = LivyConfig::new(Url::parse("http://localhost:8998").unwrap())
            .with_basic_auth("livy", "secret");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.username.as_deref(), Some("livy"));
    }

    type Requests = Arc<Mutex<Vec<String>>>;

    /// Serve `route` over HTTP on a local port, recording `METHOD /path` of
    /// every request.
    fn serve_livy(route: fn(&str) -> (u16, &'static str)) -> (LivyConfig, Requests) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let requests = Requests::default();
        let seen = requests.clone();

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let request = request_line
                    .trim_end()
                    .rsplit_once(' ')
                    .map(|(request, _)| request.to_string())
                    .unwrap_or_default();

                let mut content_length = 0;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    let header = header.trim_end();
                    if header.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':')
                        && name.eq_ignore_ascii_case("content-length")
                    {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                let mut body = vec![0; content_length];
                reader.read_exact(&mut body).unwrap();

                let (status, payload) = route(&request);
                seen.lock().unwrap().push(request);
                write!(
                    stream,
                    "HTTP/1.1 {status} Livy\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                    payload.len()
                )
                .unwrap();
            }
        });

        let mut config = LivyConfig::new(url);
        config.poll_interval = Duration::from_millis(10);
        (config, requests)
    }

    #[tokio::test]
    async fn test_session_deleted_when_startup_fails() {
        let (config, requests) = serve_livy(|request| match request {
            "POST /sessions" => (201, r#"{"id":7,"state":"starting"}"#),
            "GET /sessions/7/state" => (200, r#"{"id":7,"state":"dead"}"#),
            "DELETE /sessions/7" => (200, r#"{"msg":"deleted"}"#),
            _ => (404, r#"{"msg":"unknown"}"#),
        });

        let err = match LivyEngine::connect(config, &SessionConfig::default()).await {
            Ok(_) => panic!("session start should fail"),
            Err(err) => err,
        };

        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(err.message().contains("dead"), "{err}");
        assert_eq!(*requests.lock().unwrap(), vec![
            "POST /sessions",
            "GET /sessions/7/state",
            "DELETE /sessions/7"
        ]);
    }

    #[tokio::test]
    async fn test_startup_error_wins_over_delete_error() {
        let (config, requests) = serve_livy(|request| match request {
            "POST /sessions" => (201, r#"{"id":3,"state":"error"}"#),
            _ => (500, r#"{"msg":"internal error"}"#),
        });

        let err = match LivyEngine::connect(config, &SessionConfig::default()).await {
            Ok(_) => panic!("session start should fail"),
            Err(err) => err,
        };

        assert!(err.message().contains("failed to start"), "{err}");
        assert_eq!(*requests.lock().unwrap(), vec![
            "POST /sessions",
            "DELETE /sessions/3"
        ]);
    }

    #[tokio::test]
    async fn test_statement_and_stop() {
        let (config, requests) = serve_livy(|request| match request {
            "POST /sessions" => (201, r#"{"id":1,"state":"idle"}"#),
            "POST /sessions/1/statements" => (
                201,
                r#"{"id":0,"state":"available","output":{"status":"ok","execution_count":0,"data":{"application/json":{"schema":{"type":"struct","fields":[]},"data":[]}}}}"#,
            ),
            "DELETE /sessions/1" => (200, r#"{"msg":"deleted"}"#),
            _ => (404, r#"{"msg":"unknown"}"#),
        });
        let mut engine = LivyEngine::connect(config, &SessionConfig::default())
            .await
            .unwrap();

        let batches = engine
            .execute(&Statement::ShowNamespaces {
                catalog: "lakehouse".to_string(),
            })
            .await
            .unwrap();
        assert!(batches.is_empty());

        engine.stop().await.unwrap();
        assert!(engine.stop().await.is_err());
        assert!(engine
            .execute(&Statement::ShowNamespaces {
                catalog: "lakehouse".to_string(),
            })
            .await
            .is_err());
        assert_eq!(*requests.lock().unwrap(), vec![
            "POST /sessions",
            "POST /sessions/1/statements",
            "DELETE /sessions/1"
        ]);
    }
}
