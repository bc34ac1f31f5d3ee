use crate::domain::entities::request::AggregateFunction;
use crate::domain::entities::schema::{ColumnKind, ColumnSchema};
use crate::domain::entities::value::SqlValue;
use crate::usecase::ports::data_source::Dialect;

/// PostgreSQL: `$N` parameters with an explicit cast so the server never
/// infers a parameter type from the column it is compared with.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn param_type(value: &SqlValue) -> &'static str {
        match value {
            SqlValue::Integer(_) => "int8",
            SqlValue::Real(_) => "float8",
            SqlValue::Boolean(_) => "bool",
            SqlValue::Date(_) => "date",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Text(_) | SqlValue::Null => "text",
        }
    }
}

impl Dialect for PostgresDialect {
    fn placeholder(&self, index: usize, value: &SqlValue) -> String {
        format!("${index}::{}", Self::param_type(value))
    }

    fn text_expr(&self, column_sql: &str) -> String {
        format!("CAST({column_sql} AS TEXT)")
    }

    fn aggregate(&self, func: AggregateFunction, column: &ColumnSchema) -> String {
        let quoted = self.quote_identifier(&column.name);
        let sql_type = column.sql_type.to_ascii_lowercase();
        let name = func.sql_name();
        match func {
            AggregateFunction::Count => format!("COUNT({quoted})"),
            // SUM and AVG return NUMERIC for integer input.
            AggregateFunction::Sum | AggregateFunction::Avg => {
                format!("CAST({name}({quoted}) AS DOUBLE PRECISION)")
            }
            AggregateFunction::Min | AggregateFunction::Max => match column.kind {
                ColumnKind::Real if is_decimal_type(&sql_type) => {
                    format!("CAST({name}({quoted}) AS DOUBLE PRECISION)")
                }
                // There is no MIN/MAX over boolean.
                ColumnKind::Boolean if func == AggregateFunction::Min => {
                    format!("BOOL_AND({quoted})")
                }
                ColumnKind::Boolean => format!("BOOL_OR({quoted})"),
                ColumnKind::Text if !is_text_type(&sql_type) => {
                    format!("{name}(CAST({quoted} AS TEXT))")
                }
                _ => format!("{name}({quoted})"),
            },
        }
    }

    fn project(&self, column: &ColumnSchema) -> String {
        let quoted = self.quote_identifier(&column.name);
        let sql_type = column.sql_type.to_ascii_lowercase();
        match column.kind {
            ColumnKind::Real if is_decimal_type(&sql_type) => {
                format!("CAST({quoted} AS DOUBLE PRECISION) AS {quoted}")
            }
            ColumnKind::Text if !is_text_type(&sql_type) => {
                format!("CAST({quoted} AS TEXT) AS {quoted}")
            }
            _ => quoted,
        }
    }

    /// Text-kind columns of other types (uuid, json, enums) are compared as
    /// text, since their values are bound as `$N::text`.
    fn compare_expr(&self, column: &ColumnSchema) -> String {
        let quoted = self.quote_identifier(&column.name);
        if column.kind == ColumnKind::Text && !is_text_type(&column.sql_type.to_ascii_lowercase()) {
            format!("CAST({quoted} AS TEXT)")
        } else {
            quoted
        }
    }
}

fn is_decimal_type(sql_type: &str) -> bool {
    sql_type.starts_with("numeric") || sql_type.starts_with("decimal")
}

fn is_text_type(sql_type: &str) -> bool {
    sql_type == "text"
        || sql_type == "name"
        || sql_type.starts_with("character")
        || sql_type.starts_with("varchar")
        || sql_type.starts_with("char")
}

/// Maps `information_schema.columns.data_type` to a column kind.
pub fn column_kind(data_type: &str) -> ColumnKind {
    match data_type.to_ascii_lowercase().as_str() {
        "smallint" | "integer" | "bigint" => ColumnKind::Integer,
        "real" | "double precision" | "numeric" | "decimal" => ColumnKind::Real,
        "boolean" => ColumnKind::Boolean,
        "date" => ColumnKind::Date,
        "timestamp without time zone" | "timestamp with time zone" => ColumnKind::Timestamp,
        _ => ColumnKind::Text,
    }
}
