//! Per-request statement execution against the embedded database.
//!
//! A [`QueryExecutor`] only knows the database path. Every call to
//! [`QueryExecutor::execute`] opens its own backend handle, runs exactly one
//! statement, materializes every row, and closes the handle before returning.
//! No handle, cursor or transaction survives past the call, so executors can be
//! shared freely between connection handlers.
//!
//! Statement text is passed to SQLite untouched, but it must hold exactly one
//! statement; text with a second statement after the first is refused whole.
//! Concurrent requests are ordered only by SQLite's own file locking; a writer
//! that cannot get the lock within [`BUSY_TIMEOUT`] fails with an execution
//! error. An executor built [`with_timeout`](QueryExecutor::with_timeout)
//! interrupts statements that run past the limit.
use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::{debug, error, warn};
use rusqlite::{
    Batch, Connection, Statement, ToSql, params_from_iter,
    types::{ToSqlOutput, ValueRef},
};
use thiserror::Error;

use crate::protocol::{ErrorCode, QueryResult, Value};

/// How long a handle waits on a locked database before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Virtual machine steps between two deadline checks.
const PROGRESS_STEPS: i32 = 1000;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to open database '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to close database handle: {0}")]
    Close(#[source] rusqlite::Error),
    #[error("only one statement can be executed at a time")]
    MultipleStatements,
    #[error("statement interrupted after exceeding the {0:?} time limit")]
    TimedOut(Duration),
    #[error("{0}")]
    Statement(#[from] rusqlite::Error),
}

impl ExecutionError {
    /// Whether the failure was acquiring or releasing the handle rather than
    /// running the statement.
    pub fn is_resource(&self) -> bool {
        matches!(self, ExecutionError::Open { .. } | ExecutionError::Close(_))
    }
}

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    database: PathBuf,
    timeout: Option<Duration>,
}

impl QueryExecutor {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            timeout: None,
        }
    }

    /// Limits how long a single statement may run. `None` lets it run to
    /// completion.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    /// Executes one statement, folding any failure into an error-tagged result.
    pub fn execute(&self, sql: &str, params: &[Value]) -> QueryResult {
        match self.try_execute(sql, params) {
            Ok(result) => result,
            Err(e) => {
                if e.is_resource() {
                    error!("backend handle failure on '{}': {e}", self.database.display());
                } else {
                    warn!("statement failed: {e}");
                }
                QueryResult::error(ErrorCode::Execution, e.to_string())
            }
        }
    }

    pub fn try_execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, ExecutionError> {
        let open_err = |source: rusqlite::Error| ExecutionError::Open {
            path: self.database.clone(),
            source,
        };
        let conn = Connection::open(&self.database).map_err(open_err)?;
        let busy = self.timeout.map_or(BUSY_TIMEOUT, |t| t.min(BUSY_TIMEOUT));
        conn.busy_timeout(busy).map_err(open_err)?;
        if let Some(timeout) = self.timeout {
            let deadline = Instant::now() + timeout;
            conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));
        }
        debug!("opened backend handle on '{}'", self.database.display());

        let result = run(&conn, sql, params).map_err(|e| match (e, self.timeout) {
            (ExecutionError::Statement(e), Some(timeout))
                if e.sqlite_error_code() == Some(rusqlite::ErrorCode::OperationInterrupted) =>
            {
                ExecutionError::TimedOut(timeout)
            }
            (e, _) => e,
        });

        if let Err((_, e)) = conn.close() {
            let e = ExecutionError::Close(e);
            return match result {
                Ok(_) => Err(e),
                Err(original) => {
                    error!("{e}");
                    Err(original)
                }
            };
        }
        debug!("closed backend handle on '{}'", self.database.display());

        result
    }
}

fn run(conn: &Connection, sql: &str, params: &[Value]) -> Result<QueryResult, ExecutionError> {
    let mut batch = Batch::new(conn, sql);
    let Some(mut stmt) = batch.next()? else {
        // Blank or comment-only text runs nothing and yields nothing.
        return Ok(QueryResult::Rows {
            columns: Vec::new(),
            rows: Vec::new(),
        });
    };
    if batch.next()?.is_some() {
        return Err(ExecutionError::MultipleStatements);
    }

    if stmt.column_count() == 0 {
        let rows_affected = stmt.execute(params_from_iter(params.iter()))?;
        return Ok(QueryResult::Changed { rows_affected });
    }

    let columns = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    let rows = collect_rows(&mut stmt, columns.len(), params)?;
    Ok(QueryResult::Rows { columns, rows })
}

fn collect_rows(
    stmt: &mut Statement<'_>,
    width: usize,
    params: &[Value],
) -> Result<Vec<Vec<Value>>, ExecutionError> {
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(Value::from(row.get_ref(i)?));
        }
        out.push(values);
    }

    Ok(out)
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(r) => ValueRef::Real(*r),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}
