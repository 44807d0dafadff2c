use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use crate::error::SluiceResult;
use crate::types::Value;

/// A single row returned by a dialect adapter.
///
/// Column names are shared across all rows of one result set to avoid
/// re-allocating the header per row; values are ordered to match.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from shared column names and ordered values.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Returns the column names in result-set order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in result-set order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the value for a named column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|index| &self.values[index])
    }

    /// Consumes the row and returns its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// A lazy, pull-based sequence of rows.
///
/// The stream is finite and not restartable; the underlying connection is
/// released back to its pool when the stream is fully drained or dropped.
pub type RowStream = Pin<Box<dyn Stream<Item = SluiceResult<Row>> + Send>>;

/// A parameterized SQL statement: text plus positional bindings.
///
/// Identifiers are expected to be pre-quoted by the query builder; bindings
/// carry only data values, never identifiers or raw SQL fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl Statement {
    /// Creates a statement with no bindings.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    /// Creates a statement with positional bindings.
    pub fn with_binds(sql: impl Into<String>, binds: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_lookup_by_column_name() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        let row = Row::new(
            columns,
            vec![Value::Int(7), Value::String("acme".to_string())],
        );

        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.get("name"), Some(&Value::String("acme".to_string())));
        assert_eq!(row.get("missing"), None);
    }
}
