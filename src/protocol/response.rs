use std::fmt;

use bincode::{Decode, Encode};

use super::Value;

pub type Row = Vec<Value>;

#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub enum Response {
    Result(QueryResult),
    Pong,
    ConnectionClosed,
}

/// Outcome of executing one statement on the server.
#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub enum QueryResult {
    /// Every row produced by the statement, in backend order.
    Rows { columns: Vec<String>, rows: Vec<Row> },
    /// The statement produced no columns; carries the backend's change count.
    Changed { rows_affected: usize },
    Err { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub enum ErrorCode {
    /// The backend rejected the statement, or a backend handle could not be
    /// opened or released.
    Execution,
    /// The request frame was oversized or could not be decoded.
    Frame,
    /// The server had no capacity for the connection.
    Busy,
}

impl QueryResult {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        QueryResult::Err {
            code,
            message: message.into(),
        }
    }

    pub fn is_err(&self) -> bool {
        matches!(self, QueryResult::Err { .. })
    }

    /// Rows of a result-producing statement; empty for anything else.
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryResult::Rows { rows, .. } => rows,
            _ => &[],
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Execution => "execution",
            ErrorCode::Frame => "frame",
            ErrorCode::Busy => "busy",
        };
        write!(f, "{name}")
    }
}

/// Rows render as a list of tuples, e.g. `[(1, 'a'), (2,)]`.
impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Rows { rows, .. } => {
                write!(f, "[")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "(")?;
                    for (j, value) in row.iter().enumerate() {
                        if j > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{value}")?;
                    }
                    if row.len() == 1 {
                        write!(f, ",")?;
                    }
                    write!(f, ")")?;
                }
                write!(f, "]")
            }
            QueryResult::Changed { rows_affected } => {
                write!(f, "OK, {rows_affected} row(s) affected")
            }
            QueryResult::Err { message, .. } => write!(f, "error: {message}"),
        }
    }
}
