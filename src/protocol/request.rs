use bincode::{Decode, Encode};

use super::Value;

#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub enum Request {
    /// A single statement with optional positional parameters (`?1`, `?2`, ...).
    Query { sql: String, params: Vec<Value> },
    Ping,
    CloseConnection,
}

impl Request {
    pub fn query(sql: impl Into<String>) -> Self {
        Request::Query {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_has_no_params() {
        assert_eq!(
            Request::query("SELECT * FROM t"),
            Request::Query {
                sql: "SELECT * FROM t".to_string(),
                params: vec![],
            }
        )
    }
}
