use crate::domain::entities::value::SqlValue;
use crate::usecase::ports::data_source::Dialect;

/// SQLite: numbered `?N` parameters; `LIKE` already works on any affinity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn placeholder(&self, index: usize, _value: &SqlValue) -> String {
        format!("?{index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered() {
        assert_eq!(SqliteDialect.placeholder(3, &SqlValue::Integer(1)), "?3");
        assert_eq!(SqliteDialect.quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
