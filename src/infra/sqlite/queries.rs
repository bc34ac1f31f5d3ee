use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;

use crate::domain::entities::value::{Row, SqlValue, DATE_FORMAT, SQL_TIMESTAMP_FORMAT};
use crate::usecase::ports::data_source::Statement;

/// Layout SQLite's own date functions produce and compare against.
pub const SQLITE_TIMESTAMP_FORMAT: &str = SQL_TIMESTAMP_FORMAT;

pub fn bind_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => Value::Integer(*value),
        SqlValue::Real(value) => Value::Real(*value),
        SqlValue::Text(value) => Value::Text(value.clone()),
        SqlValue::Boolean(value) => Value::Integer(i64::from(*value)),
        SqlValue::Date(value) => Value::Text(value.format(DATE_FORMAT).to_string()),
        SqlValue::Timestamp(value) => {
            Value::Text(value.format(SQLITE_TIMESTAMP_FORMAT).to_string())
        }
    }
}

pub fn decode_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(value) => SqlValue::Integer(value),
        ValueRef::Real(value) => SqlValue::Real(value),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Runs one statement and collects every row, keyed by result column name.
pub fn run_statement(conn: &Connection, statement: &Statement) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(&statement.sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let params = statement.params.iter().map(bind_value);

    let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            cells.push((name.clone(), decode_value(row.get_ref(idx)?)));
        }
        out.push(Row::new(cells));
    }
    Ok(out)
}
