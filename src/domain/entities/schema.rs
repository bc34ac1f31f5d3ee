use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::domain::entities::value::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Boolean,
    Date,
    Timestamp,
}

impl ColumnKind {
    /// Maps a declared column type to a kind using SQLite's affinity rules,
    /// extended with the date and boolean names most schemas declare.
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.contains("TIMESTAMP") || upper.contains("DATETIME") {
            ColumnKind::Timestamp
        } else if upper == "DATE" {
            ColumnKind::Date
        } else if upper.contains("INT") {
            ColumnKind::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnKind::Text
        } else if upper.contains("BOOL") {
            ColumnKind::Boolean
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUMERIC")
            || upper.contains("DECIMAL")
        {
            ColumnKind::Real
        } else {
            ColumnKind::Text
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Real)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, ColumnKind::Date | ColumnKind::Timestamp)
    }

    /// Converts a client-supplied JSON scalar (group key, set member) into a
    /// value of this kind so it binds with the column's type.
    pub fn coerce(self, value: &JsonValue) -> Result<SqlValue, String> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let text = match value {
            JsonValue::String(text) => text.clone(),
            JsonValue::Number(number) => number.to_string(),
            JsonValue::Bool(flag) => flag.to_string(),
            other => return Err(format!("expected a scalar value, got {other}")),
        };
        match self {
            ColumnKind::Text => Ok(SqlValue::Text(text)),
            ColumnKind::Integer => {
                if let Ok(parsed) = text.trim().parse::<i64>() {
                    return Ok(SqlValue::Integer(parsed));
                }
                match text.trim().parse::<f64>() {
                    Ok(parsed) if parsed.fract() == 0.0 && parsed.is_finite() => {
                        Ok(SqlValue::Integer(parsed as i64))
                    }
                    _ => Err(format!("`{text}` is not an integer")),
                }
            }
            ColumnKind::Real => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|parsed| parsed.is_finite())
                .map(SqlValue::Real)
                .ok_or_else(|| format!("`{text}` is not a number")),
            ColumnKind::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(SqlValue::Boolean(true)),
                "false" | "0" => Ok(SqlValue::Boolean(false)),
                _ => Err(format!("`{text}` is not a boolean")),
            },
            ColumnKind::Date => parse_client_datetime(&text)
                .map(|parsed| SqlValue::Date(parsed.date()))
                .ok_or_else(|| format!("`{text}` is not a date")),
            ColumnKind::Timestamp => parse_client_datetime(&text)
                .map(SqlValue::Timestamp)
                .ok_or_else(|| format!("`{text}` is not a timestamp")),
        }
    }

    /// Restores the declared kind of a value whose storage class lost it,
    /// such as booleans stored as integers or dates stored as text.
    /// Values that do not fit the kind pass through unchanged.
    pub fn conform(self, value: SqlValue) -> SqlValue {
        match (self, value) {
            (ColumnKind::Boolean, SqlValue::Integer(flag)) => SqlValue::Boolean(flag != 0),
            (ColumnKind::Boolean, SqlValue::Text(text)) => {
                match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" => SqlValue::Boolean(true),
                    "false" | "f" | "0" => SqlValue::Boolean(false),
                    _ => SqlValue::Text(text),
                }
            }
            (ColumnKind::Date, SqlValue::Text(text)) => match parse_client_datetime(&text) {
                Some(parsed) if parsed.time() == NaiveTime::MIN => SqlValue::Date(parsed.date()),
                Some(parsed) => SqlValue::Timestamp(parsed),
                None => SqlValue::Text(text),
            },
            (ColumnKind::Timestamp, SqlValue::Text(text)) => match parse_client_datetime(&text) {
                Some(parsed) => SqlValue::Timestamp(parsed),
                None => SqlValue::Text(text),
            },
            (_, value) => value,
        }
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and
/// RFC 3339 (converted to UTC).
pub fn parse_client_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return parsed.and_hms_opt(0, 0, 0);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|parsed| parsed.naive_utc())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub sql_type: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
    /// Columns giving every row a unique, stable position. May name an
    /// engine pseudo-column such as SQLite's `rowid`.
    pub key_columns: Vec<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}
