use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::StringRecord;
use rusqlite::types::Value;
use tracing::info;

use crate::domain::entities::schema::{parse_client_datetime, ColumnKind, ColumnSchema};
use crate::domain::entities::value::DATE_FORMAT;
use crate::infra::sqlite::dialect::SqliteDialect;
use crate::infra::sqlite::queries::SQLITE_TIMESTAMP_FORMAT;
use crate::infra::sqlite::schema::open_connection;
use crate::usecase::ports::data_source::Dialect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub table: String,
    pub row_count: i64,
    pub columns: Vec<ColumnSchema>,
}

/// Narrowest type every non-empty cell of a column parses as.
#[derive(Debug, Clone, Copy)]
struct Inference {
    integer: bool,
    real: bool,
    date: bool,
    timestamp: bool,
    seen: bool,
}

impl Inference {
    fn new() -> Self {
        Self {
            integer: true,
            real: true,
            date: true,
            timestamp: true,
            seen: false,
        }
    }

    fn observe(&mut self, cell: &str) {
        let cell = cell.trim();
        if cell.is_empty() {
            return;
        }
        self.seen = true;
        self.integer &= cell.parse::<i64>().is_ok();
        self.real &= cell.parse::<f64>().is_ok();
        self.date &= NaiveDate::parse_from_str(cell, DATE_FORMAT).is_ok();
        self.timestamp &= parse_client_datetime(cell).is_some();
    }

    fn declared_type(self) -> &'static str {
        if !self.seen {
            "TEXT"
        } else if self.integer {
            "INTEGER"
        } else if self.real {
            "REAL"
        } else if self.date {
            "DATE"
        } else if self.timestamp {
            "TIMESTAMP"
        } else {
            "TEXT"
        }
    }
}

fn convert_cell(kind: ColumnKind, cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() && kind != ColumnKind::Text {
        return Value::Null;
    }
    match kind {
        ColumnKind::Integer => trimmed
            .parse()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::Text(cell.to_string())),
        ColumnKind::Real => trimmed
            .parse()
            .map(Value::Real)
            .unwrap_or_else(|_| Value::Text(cell.to_string())),
        ColumnKind::Timestamp => match parse_client_datetime(trimmed) {
            Some(parsed) => Value::Text(parsed.format(SQLITE_TIMESTAMP_FORMAT).to_string()),
            None => Value::Text(cell.to_string()),
        },
        _ => Value::Text(cell.to_string()),
    }
}

/// Loads a CSV file into a new typed table. Column types are inferred from
/// the data; empty cells in non-text columns become NULL. With `replace`
/// an existing table of the same name is dropped first.
pub fn import_csv_to_sqlite(
    db_path: &Path,
    csv_path: &Path,
    table: &str,
    replace: bool,
) -> Result<ImportResult> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open csv: {}", csv_path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read headers from csv: {}", csv_path.display()))?
        .clone();

    if headers.is_empty() {
        anyhow::bail!("csv header is required")
    }

    let records = reader
        .records()
        .collect::<std::result::Result<Vec<StringRecord>, _>>()
        .context("failed to parse csv record")?;

    let mut inference = vec![Inference::new(); headers.len()];
    for record in &records {
        for (col_idx, slot) in inference.iter_mut().enumerate() {
            slot.observe(record.get(col_idx).unwrap_or(""));
        }
    }
    let columns: Vec<ColumnSchema> = headers
        .iter()
        .zip(&inference)
        .map(|(name, inferred)| {
            let sql_type = inferred.declared_type().to_string();
            ColumnSchema {
                name: name.to_string(),
                kind: ColumnKind::from_declared_type(&sql_type),
                sql_type,
            }
        })
        .collect();

    let dialect = SqliteDialect;
    let quoted_table = dialect.quote_table(table);
    let column_defs = columns
        .iter()
        .map(|column| format!("{} {}", dialect.quote_identifier(&column.name), column.sql_type))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut conn = open_connection(db_path)?;
    let tx = conn.transaction().context("failed to start transaction")?;

    if replace {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {quoted_table}"))
            .context("failed to drop existing table")?;
    }
    tx.execute_batch(&format!("CREATE TABLE {quoted_table} ({column_defs})"))
        .with_context(|| format!("failed to create table: {table}"))?;

    let mut insert_row = tx
        .prepare(&format!("INSERT INTO {quoted_table} VALUES ({placeholders})"))
        .context("failed to prepare row insert")?;

    let mut row_count = 0_i64;
    for record in &records {
        let values = columns
            .iter()
            .enumerate()
            .map(|(col_idx, column)| convert_cell(column.kind, record.get(col_idx).unwrap_or("")));
        insert_row
            .execute(rusqlite::params_from_iter(values))
            .context("failed to insert row")?;
        row_count += 1;
    }
    drop(insert_row);

    tx.commit().context("failed to commit import transaction")?;

    info!(table, row_count, path = %csv_path.display(), "imported csv");

    Ok(ImportResult {
        table: table.to_string(),
        row_count,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::unique_test_dir;

    #[test]
    fn import_infers_column_types() {
        let dir = unique_test_dir("csv_import");
        let csv_path = dir.join("prices.csv");
        std::fs::write(
            &csv_path,
            "firm,day,px,qty,note\nAcme,2024-01-02,1.5,10,\nBeta,2024-01-03,2,,late\n",
        )
        .expect("write csv");

        let result = import_csv_to_sqlite(&dir.join("grid.db"), &csv_path, "prices", false)
            .expect("import");

        let types: Vec<_> = result
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.sql_type.as_str()))
            .collect();
        assert_eq!(
            types,
            vec![
                ("firm", "TEXT"),
                ("day", "DATE"),
                ("px", "REAL"),
                ("qty", "INTEGER"),
                ("note", "TEXT"),
            ]
        );
        assert_eq!(result.row_count, 2);

        let conn = rusqlite::Connection::open(dir.join("grid.db")).expect("open db");
        let missing_qty: i64 = conn
            .query_row("SELECT COUNT(*) FROM prices WHERE qty IS NULL", [], |row| row.get(0))
            .expect("count nulls");
        assert_eq!(missing_qty, 1);
    }

    #[test]
    fn import_refuses_existing_table_unless_replacing() {
        let dir = unique_test_dir("csv_replace");
        let csv_path = dir.join("t.csv");
        std::fs::write(&csv_path, "a\n1\n").expect("write csv");
        let db_path = dir.join("grid.db");

        import_csv_to_sqlite(&db_path, &csv_path, "t", false).expect("first import");
        assert!(import_csv_to_sqlite(&db_path, &csv_path, "t", false).is_err());
        let replaced = import_csv_to_sqlite(&db_path, &csv_path, "t", true).expect("replace");

        assert_eq!(replaced.row_count, 1);
    }
}
