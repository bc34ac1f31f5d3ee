use std::path::PathBuf;
use std::time::Instant;

use rusqlite::{Connection, ErrorCode};
use tracing::{debug, warn};

use crate::domain::entities::schema::TableSchema;
use crate::domain::entities::value::Row;
use crate::infra::pool::ConnectionPool;
use crate::infra::sqlite::dialect::SqliteDialect;
use crate::infra::sqlite::queries::run_statement;
use crate::infra::sqlite::schema::{describe_table, open_read_only};
use crate::infra::SourceOptions;
use crate::usecase::ports::data_source::{
    CancelFlag, DataSource, DataSourceError, Dialect, Statement,
};

/// VM instructions between deadline and cancellation checks.
const PROGRESS_STEPS: i32 = 1_000;

pub struct SqliteSource {
    table: String,
    dialect: SqliteDialect,
    pool: ConnectionPool<Connection>,
    options: SourceOptions,
}

impl SqliteSource {
    /// Opens one connection up front so a missing file or table fails at
    /// startup instead of on the first request.
    pub fn open(
        db_path: impl Into<PathBuf>,
        table: impl Into<String>,
        options: SourceOptions,
    ) -> Result<Self, DataSourceError> {
        let db_path = db_path.into();
        let pool = ConnectionPool::new(options.pool_size, move || {
            open_read_only(&db_path)
                .map_err(|err| DataSourceError::Unavailable(format!("{err:#}")))
        });
        let source = Self {
            table: table.into(),
            dialect: SqliteDialect,
            pool,
            options,
        };
        source.describe_table()?;
        Ok(source)
    }
}

fn run_in_transaction(
    conn: &mut Connection,
    statements: &[Statement],
) -> Result<Vec<Vec<Row>>, (&'static str, rusqlite::Error)> {
    let tx = conn
        .transaction()
        .map_err(|err| ("begin transaction", err))?;
    let mut results = Vec::with_capacity(statements.len());
    for statement in statements {
        debug!(
            operation = statement.operation,
            sql = %statement.sql,
            params = statement.params.len(),
            "executing sqlite statement"
        );
        let rows = run_statement(&tx, statement).map_err(|err| (statement.operation, err))?;
        results.push(rows);
    }
    tx.commit().map_err(|err| ("commit transaction", err))?;
    Ok(results)
}

fn classify(operation: &str, err: rusqlite::Error, cancel: &CancelFlag) -> DataSourceError {
    match err.sqlite_error_code() {
        Some(ErrorCode::OperationInterrupted) if cancel.is_cancelled() => {
            DataSourceError::Cancelled
        }
        Some(ErrorCode::OperationInterrupted) => DataSourceError::Timeout,
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::NotADatabase,
        ) => DataSourceError::Unavailable(err.to_string()),
        _ => DataSourceError::Query {
            operation: operation.to_string(),
            message: err.to_string(),
        },
    }
}

impl DataSource for SqliteSource {
    fn engine(&self) -> &'static str {
        "sqlite"
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn describe_table(&self) -> Result<TableSchema, DataSourceError> {
        let conn = self.pool.get()?;
        describe_table(&conn, &self.table).map_err(|err| DataSourceError::Query {
            operation: "describe table".to_string(),
            message: format!("{err:#}"),
        })
    }

    fn execute_all(
        &self,
        statements: &[Statement],
        cancel: &CancelFlag,
    ) -> Result<Vec<Vec<Row>>, DataSourceError> {
        if cancel.is_cancelled() {
            return Err(DataSourceError::Cancelled);
        }
        let mut conn = self.pool.get()?;

        let deadline = Instant::now() + self.options.statement_timeout;
        let flag = cancel.clone();
        conn.progress_handler(
            PROGRESS_STEPS,
            Some(move || flag.is_cancelled() || Instant::now() >= deadline),
        );
        let result = run_in_transaction(&mut conn, statements);
        conn.progress_handler(0, None::<fn() -> bool>);

        result.map_err(|(operation, err)| {
            let mapped = classify(operation, err, cancel);
            if matches!(mapped, DataSourceError::Unavailable(_)) {
                warn!(error = %mapped, "discarding sqlite connection");
                conn.mark_broken();
            }
            mapped
        })
    }

    fn exact_count(&self) -> bool {
        self.options.exact_count
    }
}
