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

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use lakehouse::engine::livy::{LivyConfig, LivyEngine};
use lakehouse::engine::memory::MemoryEngine;
use lakehouse::{Session, SessionConfig, Workflow, WorkflowReport};
use serde_json::json;
use tracing::info;

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// Remote Spark cluster through Apache Livy.
    Livy,
    /// In-process engine over local files.
    Memory,
}

impl EngineKind {
    fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Livy => "livy",
            EngineKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "lakehouse-cli",
    about = "Run the Iceberg lakehouse demo workflow against a Spark engine",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    pub output: OutputFormat,

    /// Workflow config file (YAML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Drop every table and the namespace before releasing the session.
    #[arg(long, global = true)]
    pub cleanup: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the workflow.
    Run(RunArgs),

    /// Print the statements the workflow issues, without an engine.
    Statements,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long, value_enum, default_value_t = EngineKind::Livy)]
    pub engine: EngineKind,

    /// Livy server URL (e.g., http://localhost:8998).
    #[arg(long, env = "LAKEHOUSE_LIVY_URL")]
    pub livy_url: Option<String>,

    #[arg(long, env = "LAKEHOUSE_LIVY_USER")]
    pub livy_user: Option<String>,

    #[arg(long, env = "LAKEHOUSE_LIVY_PASSWORD", requires = "livy_user")]
    pub livy_password: Option<String>,

    /// Session config file (YAML).
    #[arg(long)]
    pub session_config: Option<PathBuf>,

    /// Bucket holding the source files.
    #[arg(long, default_value = "sourcebucket")]
    pub source_bucket: String,

    #[arg(long, env = "LAKEHOUSE_SOURCE_ACCESS_KEY")]
    pub source_access_key: Option<String>,

    #[arg(long, env = "LAKEHOUSE_SOURCE_SECRET_KEY")]
    pub source_secret_key: Option<String>,

    /// Bucket receiving table data.
    #[arg(long, default_value = "targetbucket")]
    pub target_bucket: String,

    #[arg(long, env = "LAKEHOUSE_TARGET_ACCESS_KEY")]
    pub target_access_key: Option<String>,

    #[arg(long, env = "LAKEHOUSE_TARGET_SECRET_KEY")]
    pub target_secret_key: Option<String>,

    /// Serve a bucket from a local directory (memory engine), as name=dir.
    #[arg(long = "bucket-root", value_parser = config::parse_bucket_root)]
    pub bucket_roots: Vec<(String, PathBuf)>,
}

impl RunArgs {
    /// Session config with credentials from flags or the environment
    /// applied over the file.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut session = config::load_session_config(self.session_config.as_deref())?;
        for (bucket, access_key, secret_key) in [
            (
                &self.source_bucket,
                &self.source_access_key,
                &self.source_secret_key,
            ),
            (
                &self.target_bucket,
                &self.target_access_key,
                &self.target_secret_key,
            ),
        ] {
            if access_key.is_none() && secret_key.is_none() {
                continue;
            }
            let entry = session.buckets.get_mut(bucket.as_str()).with_context(|| {
                format!("credentials given for bucket '{bucket}' which is not in the session config")
            })?;
            if let Some(access_key) = access_key {
                entry.access_key = Some(access_key.clone());
            }
            if let Some(secret_key) = secret_key {
                entry.secret_key = Some(secret_key.clone());
            }
        }
        Ok(session)
    }

    fn memory_engine(&self, catalog: &str, session: &SessionConfig) -> MemoryEngine {
        let mut engine = MemoryEngine::new(catalog);
        for bucket in session.bucket_names() {
            engine = engine.with_bucket(bucket);
        }
        for (bucket, root) in &self.bucket_roots {
            engine = engine.with_bucket_root(bucket.clone(), root.clone());
        }
        engine
    }

    fn livy_config(&self) -> anyhow::Result<LivyConfig> {
        let raw = self
            .livy_url
            .as_deref()
            .context("--livy-url is required for the livy engine")?;
        let mut livy = LivyConfig::new(config::parse_livy_url(raw)?);
        if let Some(user) = &self.livy_user {
            livy = livy.with_basic_auth(user.clone(), self.livy_password.clone().unwrap_or_default());
        }
        Ok(livy)
    }
}

fn print_report(report: &WorkflowReport) {
    println!("Namespaces: {}", report.namespaces.join(", "));
    println!("Basic table rows: {}", report.basic_rows);
    println!("Parquet table rows: {}", report.parquet_rows);
    println!("CSV table rows: {}", report.csv_rows);
    println!("Appended rows: {}", report.appended_rows);
    println!(
        "Data files: {} -> {} after compaction",
        report.data_files_before_compaction, report.data_files_after_compaction
    );
    println!(
        "Snapshots: {} -> {} after expiry",
        report.snapshots_before_expiry, report.snapshots_after_expiry
    );
    println!("Orphan files removed: {}", report.orphan_files_removed.len());
    for path in &report.orphan_files_removed {
        println!("  {path}");
    }
    println!("Manifests rewritten: {}", report.manifests_rewritten);
    println!("Columns: {}", report.final_columns.join(", "));
    if report.cleaned_up {
        println!("Namespace dropped");
    }
}

impl Cli {
    pub async fn run(self) -> ExitCode {
        match self.run_inner().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        }
    }

    fn workflow(&self) -> anyhow::Result<Workflow> {
        let mut workflow_config = config::load_workflow_config(self.config.as_deref())?;
        workflow_config.cleanup_on_exit |= self.cleanup;
        Workflow::new(workflow_config).context("invalid workflow config")
    }

    async fn run_inner(self) -> anyhow::Result<()> {
        let workflow = self.workflow()?;

        match &self.command {
            Commands::Statements => {
                let steps: Vec<String> = workflow.plan().iter().map(ToString::to_string).collect();
                if self.output == OutputFormat::Json {
                    println!("{}", serde_json::to_string(&json!({ "statements": steps }))?);
                } else {
                    for step in steps {
                        println!("{step};");
                    }
                }
                Ok(())
            }
            Commands::Run(args) => {
                let session_config = args.session_config()?;
                let start = Instant::now();

                let report = match args.engine {
                    EngineKind::Memory => {
                        let engine = args.memory_engine(&workflow.config().catalog, &session_config);
                        let mut session = Session::new(engine);
                        session.run(&workflow).await?
                    }
                    EngineKind::Livy => {
                        let engine = LivyEngine::connect(args.livy_config()?, &session_config)
                            .await
                            .context("failed to start Livy session")?;
                        let mut session = Session::new(engine);
                        session.run(&workflow).await?
                    }
                };
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(duration_ms, engine = args.engine.as_str(), "Workflow completed");

                if self.output == OutputFormat::Json {
                    let payload = json!({
                        "command": "run",
                        "engine": args.engine.as_str(),
                        "duration_ms": duration_ms,
                        "report": report,
                    });
                    println!("{}", serde_json::to_string(&payload)?);
                } else {
                    print_report(&report);
                }
                Ok(())
            }
        }
    }
}
