use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres::error::SqlState;
use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Transaction};
use tracing::{debug, warn};

use crate::domain::entities::schema::{ColumnSchema, TableSchema};
use crate::domain::entities::value::{Row, SqlValue};
use crate::infra::pool::ConnectionPool;
use crate::infra::postgres::dialect::{column_kind, PostgresDialect};
use crate::infra::SourceOptions;
use crate::usecase::ports::data_source::{
    CancelFlag, DataSource, DataSourceError, Dialect, Statement,
};

type Param = Box<dyn ToSql + Sync>;

pub struct PostgresSource {
    table: String,
    dialect: PostgresDialect,
    pool: ConnectionPool<Client>,
    options: SourceOptions,
}

impl PostgresSource {
    pub fn connect(
        url: impl Into<String>,
        table: impl Into<String>,
        options: SourceOptions,
    ) -> Result<Self, DataSourceError> {
        let url = url.into();
        let timeout_ms = options.statement_timeout.as_millis();
        let pool = ConnectionPool::new(options.pool_size, move || {
            let mut client = Client::connect(&url, NoTls)
                .map_err(|err| DataSourceError::Unavailable(err.to_string()))?;
            client
                .batch_execute(&format!(
                    "SET statement_timeout = {timeout_ms}; SET default_transaction_read_only = on"
                ))
                .map_err(|err| DataSourceError::Unavailable(err.to_string()))?;
            Ok(client)
        });
        let source = Self {
            table: table.into(),
            dialect: PostgresDialect,
            pool,
            options,
        };
        source.describe_table()?;
        Ok(source)
    }
}

fn split_table_name(table: &str) -> (&str, &str) {
    match table.split_once('.') {
        Some((schema, name)) => (schema, name),
        None => ("public", table),
    }
}

fn to_param(value: &SqlValue) -> Param {
    match value {
        SqlValue::Null => Box::new(None::<String>),
        SqlValue::Integer(value) => Box::new(*value),
        SqlValue::Real(value) => Box::new(*value),
        SqlValue::Text(value) => Box::new(value.clone()),
        SqlValue::Boolean(value) => Box::new(*value),
        SqlValue::Date(value) => Box::new(*value),
        SqlValue::Timestamp(value) => Box::new(*value),
    }
}

enum Failure {
    Engine(&'static str, postgres::Error),
    Decode(&'static str, String),
    Cancelled,
}

fn decode_cell(row: &postgres::Row, idx: usize) -> Result<SqlValue, Failure> {
    let ty = row.columns()[idx].type_();
    let engine = |err| Failure::Engine("decode row", err);
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)
            .map_err(engine)?
            .map(SqlValue::Boolean)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .map_err(engine)?
            .map(|value| SqlValue::Integer(value.into()))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .map_err(engine)?
            .map(|value| SqlValue::Integer(value.into()))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)
            .map_err(engine)?
            .map(SqlValue::Integer)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)
            .map_err(engine)?
            .map(|value| SqlValue::Real(value.into()))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)
            .map_err(engine)?
            .map(SqlValue::Real)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        row.try_get::<_, Option<String>>(idx)
            .map_err(engine)?
            .map(SqlValue::Text)
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)
            .map_err(engine)?
            .map(SqlValue::Date)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(engine)?
            .map(SqlValue::Timestamp)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)
            .map_err(engine)?
            .map(|value| SqlValue::Timestamp(value.naive_utc()))
    } else {
        return Err(Failure::Decode(
            "decode row",
            format!(
                "unsupported column type `{}` for `{}`",
                ty.name(),
                row.columns()[idx].name()
            ),
        ));
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn run_statement(tx: &mut Transaction<'_>, statement: &Statement) -> Result<Vec<Row>, Failure> {
    let params: Vec<Param> = statement.params.iter().map(to_param).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|param| param.as_ref()).collect();
    let rows = tx
        .query(statement.sql.as_str(), &refs)
        .map_err(|err| Failure::Engine(statement.operation, err))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut cells = Vec::with_capacity(row.len());
        for (idx, column) in row.columns().iter().enumerate() {
            cells.push((column.name().to_string(), decode_cell(row, idx)?));
        }
        out.push(Row::new(cells));
    }
    Ok(out)
}

fn run_in_transaction(
    client: &mut Client,
    statements: &[Statement],
    cancel: &CancelFlag,
) -> Result<Vec<Vec<Row>>, Failure> {
    let mut tx = client
        .build_transaction()
        .read_only(true)
        .start()
        .map_err(|err| Failure::Engine("begin transaction", err))?;
    let mut results = Vec::with_capacity(statements.len());
    for statement in statements {
        if cancel.is_cancelled() {
            return Err(Failure::Cancelled);
        }
        debug!(
            operation = statement.operation,
            sql = %statement.sql,
            params = statement.params.len(),
            "executing postgres statement"
        );
        results.push(run_statement(&mut tx, statement)?);
    }
    tx.commit()
        .map_err(|err| Failure::Engine("commit transaction", err))?;
    Ok(results)
}

impl DataSource for PostgresSource {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn describe_table(&self) -> Result<TableSchema, DataSourceError> {
        let mut client = self.pool.get()?;
        let (schema_name, table_name) = split_table_name(&self.table);
        let describe_err = |err: postgres::Error| DataSourceError::Query {
            operation: "describe table".to_string(),
            message: err.to_string(),
        };

        let rows = client
            .query(
                "SELECT column_name::text, data_type::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&schema_name, &table_name],
            )
            .map_err(describe_err)?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0).map_err(describe_err)?;
            let sql_type: String = row.try_get(1).map_err(describe_err)?;
            columns.push(ColumnSchema {
                kind: column_kind(&sql_type),
                name,
                sql_type,
            });
        }
        if columns.is_empty() {
            return Err(DataSourceError::Query {
                operation: "describe table".to_string(),
                message: format!("table not found: {}", self.table),
            });
        }

        let quoted = self.dialect.quote_table(&self.table);
        let key_rows = client
            .query(
                "SELECT a.attname::text
                 FROM pg_index i
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                 WHERE i.indrelid = $1::text::regclass AND i.indisprimary
                 ORDER BY array_position(i.indkey::int2[], a.attnum)",
                &[&quoted],
            )
            .map_err(describe_err)?;
        let mut key_columns = Vec::with_capacity(key_rows.len());
        for row in &key_rows {
            key_columns.push(row.try_get::<_, String>(0).map_err(describe_err)?);
        }

        Ok(TableSchema {
            columns,
            key_columns,
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
        let mut client = self.pool.get()?;

        run_in_transaction(&mut client, statements, cancel).map_err(|failure| match failure {
            Failure::Cancelled => DataSourceError::Cancelled,
            Failure::Decode(operation, message) => DataSourceError::Query {
                operation: operation.to_string(),
                message,
            },
            Failure::Engine(_, err) if err.code() == Some(&SqlState::QUERY_CANCELED) => {
                DataSourceError::Timeout
            }
            Failure::Engine(operation, err) => match err.as_db_error() {
                Some(db) => DataSourceError::Query {
                    operation: operation.to_string(),
                    message: db.message().to_string(),
                },
                None if client.is_closed() => {
                    warn!(error = %err, "discarding postgres connection");
                    client.mark_broken();
                    DataSourceError::Unavailable(err.to_string())
                }
                None => DataSourceError::Query {
                    operation: operation.to_string(),
                    message: err.to_string(),
                },
            },
        })
    }

    fn exact_count(&self) -> bool {
        self.options.exact_count
    }
}
