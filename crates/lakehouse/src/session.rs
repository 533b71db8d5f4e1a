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

//! Session configuration and the guard that releases the engine session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::{Error, ErrorKind, Result};
use crate::workflow::{Workflow, WorkflowReport};

/// Spark configuration key prefix for per-bucket S3A settings.
pub const S3A_BUCKET_CONF_PREFIX: &str = "spark.hadoop.fs.s3a.bucket";

/// Spark property fixing the zone of timestamps in query results.
pub const SESSION_TIME_ZONE_CONF: &str = "spark.sql.session.timeZone";

/// Endpoint and credentials of one object-storage bucket.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

impl BucketConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: None,
            secret_key: None,
        }
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }
}

impl std::fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Configuration used to start an engine session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub app_name: String,
    pub buckets: BTreeMap<String, BucketConfig>,
    /// Use the Hive metastore as the session catalog.
    pub hive_support: bool,
    /// Additional Spark properties, applied last.
    pub extra_conf: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_name: "lh-hms-cloud".to_string(),
            buckets: BTreeMap::from([
                (
                    "sourcebucket".to_string(),
                    BucketConfig::new("s3.us.cloud-object-storage.appdomain.cloud"),
                ),
                (
                    "targetbucket".to_string(),
                    BucketConfig::new("s3.us-south.cloud-object-storage.appdomain.cloud"),
                ),
            ]),
            hive_support: true,
            extra_conf: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// Spark properties for this session.
    pub fn to_spark_conf(&self) -> BTreeMap<String, String> {
        let mut conf = BTreeMap::new();
        conf.insert("spark.app.name".to_string(), self.app_name.clone());

        for (name, bucket) in &self.buckets {
            let prefix = format!("{S3A_BUCKET_CONF_PREFIX}.{name}");
            conf.insert(format!("{prefix}.endpoint"), bucket.endpoint.clone());
            if let Some(access_key) = &bucket.access_key {
                conf.insert(format!("{prefix}.access.key"), access_key.clone());
            }
            if let Some(secret_key) = &bucket.secret_key {
                conf.insert(format!("{prefix}.secret.key"), secret_key.clone());
            }
        }

        // Commit times are read back and compared as UTC instants.
        conf.insert(SESSION_TIME_ZONE_CONF.to_string(), "UTC".to_string());

        if self.hive_support {
            conf.insert(
                "spark.sql.catalogImplementation".to_string(),
                "hive".to_string(),
            );
        }

        conf.extend(
            self.extra_conf
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        conf
    }

    /// Names of the configured buckets.
    pub fn bucket_names(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }
}

/// Owns an engine session and releases it exactly once.
///
/// ```rust,ignore
/// let mut session = Session::new(engine);
/// let report = session.run(&workflow).await?;
/// ```
pub struct Session<E: Engine> {
    engine: E,
    released: bool,
}

impl<E: Engine> Session<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            released: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Run the workflow, then release the session whether or not it
    /// succeeded.
    ///
    /// When both the workflow and the release fail, the workflow error is
    /// returned and the release error is logged.
    pub async fn run(&mut self, workflow: &Workflow) -> Result<WorkflowReport> {
        if self.released {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "Session has already been released",
            ));
        }

        let outcome = workflow.run(&mut self.engine).await;
        self.released = true;
        let released = self.engine.stop().await;

        match (outcome, released) {
            (Ok(report), Ok(())) => {
                info!("Session released");
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(error = %release_err, "Failed to release session after workflow failure");
                Err(e)
            }
        }
    }

    pub fn into_engine(self) -> E {
        self.engine
    }
}
