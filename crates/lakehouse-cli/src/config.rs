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

use std::path::{Path, PathBuf};

use anyhow::Context;
use lakehouse::{SessionConfig, WorkflowConfig};
use serde::de::DeserializeOwned;
use url::Url;

pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(path_str) = path.to_str() else {
        return path.to_path_buf();
    };

    if path_str == "~" {
        return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
    }

    let Some(rest) = path_str.strip_prefix("~/") else {
        return path.to_path_buf();
    };

    let Some(home) = dirs::home_dir() else {
        return path.to_path_buf();
    };

    home.join(rest)
}

fn load_yaml<T: DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let path = expand_tilde(path);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {what}: {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {what}: {}", path.display()))
}

/// Workflow settings from `path`, or the built-in demo defaults.
pub fn load_workflow_config(path: Option<&Path>) -> anyhow::Result<WorkflowConfig> {
    match path {
        Some(path) => load_yaml(path, "workflow config"),
        None => Ok(WorkflowConfig::default()),
    }
}

/// Session settings from `path`, or the built-in two-bucket defaults.
pub fn load_session_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    match path {
        Some(path) => load_yaml(path, "session config"),
        None => Ok(SessionConfig::default()),
    }
}

/// Parse and check a Livy server URL.
pub fn parse_livy_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid --livy-url '{raw}'"))?;
    anyhow::ensure!(
        matches!(url.scheme(), "http" | "https"),
        "unsupported --livy-url scheme: {} (supported: http://, https://)",
        url.scheme()
    );
    Ok(url)
}

/// Parse a `name=dir` bucket root mapping.
pub fn parse_bucket_root(raw: &str) -> Result<(String, PathBuf), String> {
    let (name, dir) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=dir, got '{raw}'"))?;
    if name.is_empty() || dir.is_empty() {
        return Err(format!("expected name=dir, got '{raw}'"));
    }
    Ok((name.to_string(), expand_tilde(Path::new(dir))))
}
