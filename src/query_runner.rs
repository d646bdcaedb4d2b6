//! Query Runner
//!
//! Executes validated statements on the read-only pool and converts the
//! rows into ordered JSON records.

use crate::error::{Nl2SqlError, Result};
use crate::logging::preview;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, info, warn};

/// How lock contention on the store is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total executions, first try included. Never below 1.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
    /// Answer with an empty result instead of an error once attempts run
    /// out. Hides a real outage from the caller, so it is off by default.
    pub empty_on_exhausted: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            empty_on_exhausted: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    /// Set when the rows are the empty fallback of an exhausted retry policy.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retries_exhausted: bool,
}

impl ExecutionResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Clone)]
pub struct QueryRunner {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl QueryRunner {
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run one already-validated statement.
    pub async fn run_sql(&self, sql: &str) -> Result<ExecutionResult> {
        if sql.trim().is_empty() {
            return Err(Nl2SqlError::Input("SQL must not be empty".to_string()));
        }
        info!("Executing SQL: {:?}", preview(sql, 200));

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute_once(sql).await {
                Ok(result) => {
                    info!("SQL returned {} rows", result.row_count());
                    return Ok(result);
                }
                Err(e) if is_transient(&e) => {
                    if attempt < max_attempts {
                        warn!(
                            "Store busy (attempt {}/{}): {}; retrying in {:?}",
                            attempt, max_attempts, e, self.retry.backoff
                        );
                        tokio::time::sleep(self.retry.backoff).await;
                        continue;
                    }
                    if self.retry.empty_on_exhausted {
                        warn!(
                            "Store still busy after {} attempts: {}; returning empty result",
                            attempt, e
                        );
                        return Ok(ExecutionResult {
                            retries_exhausted: true,
                            ..Default::default()
                        });
                    }
                    error!("Store still busy after {} attempts: {}", attempt, e);
                    return Err(Nl2SqlError::TransientExecution {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    error!("SQL execution failed: {}", e);
                    return Err(Nl2SqlError::Execution(e.to_string()));
                }
            }
        }
    }

    async fn execute_once(&self, sql: &str) -> std::result::Result<ExecutionResult, sqlx::Error> {
        // The connection goes back to the pool when `conn` drops, on every path.
        let mut conn = self.pool.acquire().await?;
        let statement = (&mut *conn).prepare(sql).await?;
        let columns = unique_column_names(statement.columns().iter().map(|c| c.name()));
        let rows = statement.query().fetch_all(&mut *conn).await?;

        let rows = rows
            .iter()
            .map(|row| {
                let mut record = Map::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    record.insert(name.clone(), column_value(row, i));
                }
                record
            })
            .collect();

        Ok(ExecutionResult {
            columns,
            rows,
            retries_exhausted: false,
        })
    }
}

/// Lock or contention conditions worth another attempt: SQLITE_BUSY and
/// SQLITE_LOCKED (including extended codes) and pool exhaustion.
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(5) | Some(6)) || {
                let message = db.message().to_lowercase();
                message.contains("database is locked") || message.contains("table is locked")
            }
        }
        _ => false,
    }
}

/// Column names in result order. Repeated names get a `_2`, `_3`, ...
/// suffix so no value is lost when rows become records.
fn unique_column_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .map(|name| {
            let mut candidate = name.to_string();
            let mut n = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", name, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// SQLite values are dynamically typed, so decode by the storage class of
/// each value rather than the declared column type.
fn column_value(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_uppercase();

    match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "INT8" | "BOOLEAN" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" | "DOUBLE" | "FLOAT" | "NUMERIC" => row
            .try_get_unchecked::<f64, _>(index)
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
