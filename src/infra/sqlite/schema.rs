use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::domain::entities::schema::{ColumnKind, ColumnSchema, TableSchema};

/// Read-write connection, creating the file and its parent directory.
pub fn open_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent dir: {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open db: {}", db_path.display()))?;
    Ok(conn)
}

/// Connection used to serve grid requests. The file must already exist and
/// writes are refused at both the open flags and the pragma level.
pub fn open_read_only(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open db read-only: {}", db_path.display()))?;
    conn.execute_batch("PRAGMA query_only = ON")
        .context("failed to enable query_only")?;
    Ok(conn)
}

fn split_table_name(table: &str) -> (&str, &str) {
    match table.split_once('.') {
        Some((schema, name)) => (schema, name),
        None => ("main", table),
    }
}

/// Reads column names, declared types and the primary key of `table`.
/// Rowid tables without a declared key fall back to `rowid`; views get no
/// key at all.
pub fn describe_table(conn: &Connection, table: &str) -> Result<TableSchema> {
    let (schema_name, table_name) = split_table_name(table);

    let object: Option<(String, bool)> = conn
        .query_row(
            "SELECT type, wr FROM pragma_table_list WHERE schema = ?1 AND name = ?2",
            [schema_name, table_name],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0)),
        )
        .optional()
        .with_context(|| format!("failed to look up table: {table}"))?;
    let Some((object_type, without_rowid)) = object else {
        anyhow::bail!("table not found: {table}");
    };

    let mut stmt = conn
        .prepare("SELECT name, type, pk FROM pragma_table_info(?1, ?2) ORDER BY cid")
        .context("failed to prepare table_info query")?;
    let rows = stmt
        .query_map([table_name, schema_name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .context("failed to query table_info")?;

    let mut columns = Vec::new();
    let mut keyed: Vec<(i64, String)> = Vec::new();
    for item in rows {
        let (name, sql_type, pk) = item.context("failed to read table_info row")?;
        if pk > 0 {
            keyed.push((pk, name.clone()));
        }
        columns.push(ColumnSchema {
            kind: ColumnKind::from_declared_type(&sql_type),
            name,
            sql_type,
        });
    }
    if columns.is_empty() {
        anyhow::bail!("table has no columns: {table}");
    }

    keyed.sort();
    let mut key_columns: Vec<String> = keyed.into_iter().map(|(_, name)| name).collect();
    if key_columns.is_empty() && object_type == "table" && !without_rowid {
        key_columns.push("rowid".to_string());
    }

    Ok(TableSchema {
        columns,
        key_columns,
    })
}
