use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Number, Value as JsonValue};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Layout SQL engines use for timestamps stored or compared as text.
pub const SQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Typed cell value moving between the engines, the compiler and the shaper.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(value) => Some(*value),
            SqlValue::Real(value) if value.fract() == 0.0 => Some(*value as i64),
            SqlValue::Text(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    /// JSON rendering used in responses: dates become ISO-8601 strings and
    /// non-finite floats become `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Integer(value) => JsonValue::from(*value),
            SqlValue::Real(value) => Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Text(value) => JsonValue::String(value.clone()),
            SqlValue::Boolean(value) => JsonValue::Bool(*value),
            SqlValue::Date(value) => JsonValue::String(value.format(DATE_FORMAT).to_string()),
            SqlValue::Timestamp(value) => {
                JsonValue::String(value.format(TIMESTAMP_FORMAT).to_string())
            }
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(value) => write!(f, "{value}"),
            SqlValue::Real(value) => write!(f, "{value}"),
            SqlValue::Text(value) => write!(f, "{value}"),
            SqlValue::Boolean(value) => write!(f, "{value}"),
            SqlValue::Date(value) => write!(f, "{}", value.format(DATE_FORMAT)),
            SqlValue::Timestamp(value) => write!(f, "{}", value.format(TIMESTAMP_FORMAT)),
        }
    }
}

/// One result row, column order preserved as the engine returned it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub cells: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(cells: Vec<(String, SqlValue)>) -> Self {
        Self { cells }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn first(&self) -> Option<&SqlValue> {
        self.cells.first().map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_json_formats_dates_and_drops_non_finite_reals() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid date");
        let timestamp = date.and_hms_opt(14, 5, 0).expect("valid time");

        assert_eq!(SqlValue::Date(date).to_json(), JsonValue::from("2024-03-09"));
        assert_eq!(
            SqlValue::Timestamp(timestamp).to_json(),
            JsonValue::from("2024-03-09T14:05:00")
        );
        assert_eq!(SqlValue::Real(f64::NAN).to_json(), JsonValue::Null);
        assert_eq!(SqlValue::Real(f64::INFINITY).to_json(), JsonValue::Null);
        assert_eq!(SqlValue::Real(1.5).to_json(), JsonValue::from(1.5));
        assert_eq!(SqlValue::Integer(7).to_json(), JsonValue::from(7));
    }

    #[test]
    fn as_i64_accepts_whole_reals_and_numeric_text() {
        assert_eq!(SqlValue::Real(3.0).as_i64(), Some(3));
        assert_eq!(SqlValue::Real(3.5).as_i64(), None);
        assert_eq!(SqlValue::Text(" 42 ".to_string()).as_i64(), Some(42));
        assert_eq!(SqlValue::Null.as_i64(), None);
    }
}
