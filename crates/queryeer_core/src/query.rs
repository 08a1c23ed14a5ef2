use crate::Value;
use serde::{Deserialize, Serialize};

/// A single row of query results.
pub type Row = Vec<Value>;

/// Metadata for a result column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name as returned by the database.
    pub name: String,

    /// Database-specific type name (e.g., "varchar", "INTEGER").
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// One result set produced by a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }
}

/// What a statement inside a batch produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    ResultSet(QueryResult),
    UpdateCount(u64),
}

/// Lazily yields the results of one batch, one statement at a time.
///
/// Statements run as `next_result` is called, so a caller that stops
/// pulling stops the batch.
pub trait StatementCursor {
    fn next_result(&mut self) -> Result<Option<StatementResult>, crate::DbError>;
}

/// Cursor over results that are already materialised.
pub struct BufferedCursor {
    results: std::collections::VecDeque<Result<StatementResult, crate::DbError>>,
}

impl BufferedCursor {
    pub fn new(results: Vec<Result<StatementResult, crate::DbError>>) -> Self {
        Self {
            results: results.into(),
        }
    }
}

impl StatementCursor for BufferedCursor {
    fn next_result(&mut self) -> Result<Option<StatementResult>, crate::DbError> {
        self.results.pop_front().transpose()
    }
}
