use crate::{
    row_map::{FromRow, RowRef},
    RetryDbError, Result, Value,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Col {
    pub name: String,
    pub decltype: Option<String>,
}

/// Rows returned by a query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub cols: Vec<Col>,
    pub rows: Vec<Vec<Value>>,
    pub replication_index: Option<String>,
    pub rows_read: Option<u64>,
    pub rows_written: Option<u64>,
    pub query_duration_ms: Option<f64>,
}

impl QueryResult {
    /// Iterates rows as name-addressable views.
    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(|values| RowRef {
            cols: &self.cols,
            values,
        })
    }

    /// First row, if any.
    pub fn first(&self) -> Option<RowRef<'_>> {
        self.iter().next()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Maps the first row, or fails with [`RetryDbError::NoRows`].
    pub fn first_as<T: FromRow>(&self) -> Result<T> {
        T::from_row(self.first().ok_or(RetryDbError::NoRows)?)
    }

    /// Maps every row in order.
    pub fn rows_as<T: FromRow>(&self) -> Result<Vec<T>> {
        self.iter().map(T::from_row).collect()
    }
}

/// Outcome of a write statement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub affected_row_count: u64,
    pub last_insert_rowid: Option<i64>,
    pub replication_index: Option<String>,
    pub rows_read: Option<u64>,
    pub rows_written: Option<u64>,
}
