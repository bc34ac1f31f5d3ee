use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::entities::request::AggregateFunction;
use crate::domain::entities::schema::{ColumnSchema, TableSchema};
use crate::domain::entities::value::{Row, SqlValue};
use crate::domain::error::SsrmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    /// Connecting, pooling or the network failed; no statement ran.
    Unavailable(String),
    /// The engine rejected or failed a statement.
    Query { operation: String, message: String },
    Timeout,
    Cancelled,
}

impl std::fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSourceError::Unavailable(message) => write!(f, "data source unavailable: {message}"),
            DataSourceError::Query { operation, message } => {
                write!(f, "{operation} failed: {message}")
            }
            DataSourceError::Timeout => write!(f, "statement timed out"),
            DataSourceError::Cancelled => write!(f, "statement cancelled"),
        }
    }
}

impl std::error::Error for DataSourceError {}

impl From<DataSourceError> for SsrmError {
    fn from(err: DataSourceError) -> Self {
        match err {
            DataSourceError::Unavailable(message) => SsrmError::Unavailable(message),
            DataSourceError::Query { operation, message } => {
                SsrmError::Query { operation, message }
            }
            DataSourceError::Timeout => SsrmError::Timeout,
            DataSourceError::Cancelled => SsrmError::Cancelled,
        }
    }
}

/// A parameterized statement. `sql` only ever contains placeholders for
/// client-supplied values; `params` holds them in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub operation: &'static str,
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Cooperative cancellation shared between a request and the worker
/// running its statements.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// SQL text differences between engines. The query compiler only talks to
/// this trait.
pub trait Dialect: Send + Sync {
    fn quote_char(&self) -> char {
        '"'
    }

    fn quote_identifier(&self, name: &str) -> String {
        let quote = self.quote_char();
        let escaped = name.replace(quote, &format!("{quote}{quote}"));
        format!("{quote}{escaped}{quote}")
    }

    /// Quotes every part of a possibly schema-qualified table name.
    fn quote_table(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Marker for the 1-based parameter `index` that will carry `value`.
    fn placeholder(&self, index: usize, value: &SqlValue) -> String;

    fn paginate(&self, base: &str, limit: u64, offset: u64) -> String {
        format!("{base} LIMIT {limit} OFFSET {offset}")
    }

    fn count_query(&self, base: &str) -> String {
        format!(
            "SELECT COUNT(*) FROM ({base}) AS {}",
            self.quote_identifier("ssrm_count")
        )
    }

    /// Expression that lets `LIKE` and `LOWER` operate on any column.
    fn text_expr(&self, column_sql: &str) -> String {
        column_sql.to_string()
    }

    /// Aggregate over one column. The result must decode as the column's
    /// kind, or as a number for `SUM`, `AVG` and `COUNT`.
    fn aggregate(&self, func: AggregateFunction, column: &ColumnSchema) -> String {
        format!("{}({})", func.sql_name(), self.quote_identifier(&column.name))
    }

    /// Select-list expression for one table column, also used for grouping
    /// columns in group rows.
    fn project(&self, column: &ColumnSchema) -> String {
        self.quote_identifier(&column.name)
    }

    /// Left-hand side of a comparison against a bound value of the
    /// column's kind.
    fn compare_expr(&self, column: &ColumnSchema) -> String {
        self.quote_identifier(&column.name)
    }
}

/// A read-only relational table behind a connection pool.
pub trait DataSource: Send + Sync {
    fn engine(&self) -> &'static str;

    fn table_name(&self) -> &str;

    fn dialect(&self) -> &dyn Dialect;

    fn describe_table(&self) -> Result<TableSchema, DataSourceError>;

    /// Runs `statements` on one connection inside one read transaction and
    /// returns their result sets in order.
    fn execute_all(
        &self,
        statements: &[Statement],
        cancel: &CancelFlag,
    ) -> Result<Vec<Vec<Row>>, DataSourceError>;

    fn execute(
        &self,
        statement: &Statement,
        cancel: &CancelFlag,
    ) -> Result<Vec<Row>, DataSourceError> {
        let mut results = self.execute_all(std::slice::from_ref(statement), cancel)?;
        Ok(results.pop().unwrap_or_default())
    }

    /// `false` when exact counts are too expensive; responses then carry a
    /// null `rowCount`.
    fn exact_count(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Backtick;

    impl Dialect for Backtick {
        fn quote_char(&self) -> char {
            '`'
        }

        fn placeholder(&self, _index: usize, _value: &SqlValue) -> String {
            "?".to_string()
        }
    }

    #[test]
    fn quote_identifier_doubles_embedded_quotes() {
        assert_eq!(Backtick.quote_identifier("price"), "`price`");
        assert_eq!(Backtick.quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn quote_table_quotes_each_part() {
        assert_eq!(Backtick.quote_table("sales.orders"), "`sales`.`orders`");
    }

    #[test]
    fn paginate_and_count_wrap_base_query() {
        assert_eq!(
            Backtick.paginate("SELECT 1", 10, 20),
            "SELECT 1 LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            Backtick.count_query("SELECT 1"),
            "SELECT COUNT(*) FROM (SELECT 1) AS `ssrm_count`"
        );
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let worker = flag.clone();
        assert!(!worker.is_cancelled());
        flag.cancel();
        assert!(worker.is_cancelled());
    }
}
