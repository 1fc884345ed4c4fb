// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink that inserts rows through the ClickHouse HTTP interface.
//!
//! Each row is sent as its own `INSERT ... FORMAT JSONEachRow` request. The
//! JSON keys of [`StorageLogRow`] match the columns of `nginx_access_logs`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, trace};

use crate::constants::{DEFAULT_CLICKHOUSE_TABLE, DEFAULT_CLICKHOUSE_TIMEOUT};
use crate::errors::SinkError;
use crate::record::StorageLogRow;
use crate::sink::Sink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickHouseConfig {
    /// Base URL of the HTTP interface, e.g. `http://localhost:8123`.
    pub url: String,
    pub table: String,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl ClickHouseConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            table: DEFAULT_CLICKHOUSE_TABLE.to_string(),
            database: None,
            user: None,
            password: None,
            timeout: DEFAULT_CLICKHOUSE_TIMEOUT,
        }
    }
}

pub struct ClickHouseSink {
    client: reqwest::Client,
    url: String,
    insert_query: String,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl ClickHouseSink {
    pub fn new(config: ClickHouseConfig) -> Result<Self, SinkError> {
        if !is_identifier(&config.table) {
            return Err(SinkError::Client(format!(
                "invalid table name '{}'",
                config.table
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url,
            insert_query: format!("INSERT INTO {} FORMAT JSONEachRow", config.table),
            database: config.database,
            user: config.user,
            password: config.password,
        })
    }
}

#[async_trait]
impl Sink for ClickHouseSink {
    async fn write(&self, row: StorageLogRow) -> Result<(), SinkError> {
        let mut body = serde_json::to_vec(&row).map_err(|e| SinkError::Serialize(e.to_string()))?;
        body.push(b'\n');
        trace!("Inserting row into ClickHouse: {} bytes", body.len());

        let mut request = self
            .client
            .post(&self.url)
            .query(&[("query", self.insert_query.as_str())])
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(database) = &self.database {
            request = request.query(&[("database", database.as_str())]);
        }
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("ClickHouse accepted row with status {}", status);
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "clickhouse"
    }
}

/// `name` or `database.name`, ASCII alphanumerics and underscores only.
pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            part.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
