//! Client for the tabular query protocol.
//!
//! The service executes `SELECT` statements and answers with a columns
//! + rows JSON body. [`QueryClient`] performs synchronous execution
//! (one awaited round trip); the [`job`] submodule drives the
//! asynchronous job protocol for long-running queries.
//!
//! Execution is abstracted behind [`QueryEngine`] so metadata readers
//! can be exercised against canned responses.

pub mod job;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ReadError, ReadResult};
use crate::meta::Extras;

/// Default timeout for query round trips (30 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Request body for synchronous query execution.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRequest {
    /// Query text.
    pub query: String,
    /// Maximum number of rows to return, if limited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxrec: Option<u64>,
}

/// Wire shape of a query response.
#[derive(Debug, Clone, Deserialize)]
struct RowSetDoc {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

/// Decoded query response with by-name cell access.
///
/// Column lookup is case-insensitive; when the service reports
/// duplicate column names the first occurrence wins.
#[derive(Debug, Clone)]
pub struct RowSet {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Build a row set from decoded parts.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut index = HashMap::new();
        for (ic, name) in columns.iter().enumerate() {
            index.entry(name.to_ascii_lowercase()).or_insert(ic);
        }
        Self {
            columns,
            index,
            rows,
        }
    }

    /// Column names as reported.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the response carried no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Raw cell value, or `None` for unknown column / short row.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let ic = *self.index.get(&column.to_ascii_lowercase())?;
        let value = self.rows.get(row)?.get(ic)?;
        if value.is_null() {
            None
        } else {
            Some(value)
        }
    }

    /// Cell rendered as a string. Numbers are rendered with their JSON
    /// notation; other non-string values yield `None`.
    pub fn str_cell(&self, row: usize, column: &str) -> Option<String> {
        match self.cell(row, column)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Cell interpreted as a boolean: a non-zero number or a JSON
    /// boolean. Anything else is `false`.
    pub fn bool_cell(&self, row: usize, column: &str) -> bool {
        match self.cell(row, column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            _ => false,
        }
    }

    /// Cell interpreted as a number, `None` when absent or non-numeric.
    pub fn f64_cell(&self, row: usize, column: &str) -> Option<f64> {
        match self.cell(row, column)? {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Non-blank cells of a row outside the given standard column set,
    /// keyed by reported column name.
    pub fn extras(&self, row: usize, std_columns: &[&str]) -> Extras {
        let mut extras = Extras::new();
        for name in &self.columns {
            let lower = name.to_ascii_lowercase();
            if std_columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                continue;
            }
            let ic = self.index[&lower];
            if let Some(value) = self.rows.get(row).and_then(|r| r.get(ic)) {
                let blank = value.is_null() || value.as_str().is_some_and(str::is_empty);
                if !blank {
                    extras.insert(name.clone(), value.clone());
                }
            }
        }
        extras
    }
}

/// Something that can execute a query and produce a [`RowSet`].
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Execute the query text and decode the response.
    async fn execute(&self, query: &str) -> ReadResult<RowSet>;

    /// Identifying string of the queried endpoint.
    fn endpoint(&self) -> String;
}

/// HTTP client for the synchronous query endpoint.
pub struct QueryClient {
    http: reqwest::Client,
    endpoint: String,
    maxrec: Option<u64>,
}

impl QueryClient {
    /// Client for the given synchronous endpoint.
    pub fn new(endpoint: impl Into<String>, maxrec: Option<u64>) -> ReadResult<Self> {
        Self::with_timeout(endpoint, maxrec, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Client with an explicit round-trip timeout.
    pub fn with_timeout(
        endpoint: impl Into<String>,
        maxrec: Option<u64>,
        timeout: Duration,
    ) -> ReadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ReadError::Http)?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            maxrec,
        })
    }

    /// Execute a query synchronously and decode the row set.
    pub async fn execute_sync(&self, query: &str) -> ReadResult<RowSet> {
        tracing::debug!(endpoint = %self.endpoint, %query, "executing query");
        let body = SyncRequest {
            query: query.to_string(),
            maxrec: self.maxrec,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(ReadError::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReadError::Status {
                url: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }
        let doc: RowSetDoc = response.json().await.map_err(ReadError::Http)?;
        Ok(RowSet::new(doc.columns, doc.rows))
    }
}

#[async_trait]
impl QueryEngine for QueryClient {
    async fn execute(&self, query: &str) -> ReadResult<RowSet> {
        self.execute_sync(query).await
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}
