use crate::domain::entities::filter::{FilterCondition, JoinOperator, RangeCondition, TextCondition};
use crate::domain::entities::request::{AggregateFunction, DataRequest, COUNT_ALIAS};
use crate::domain::entities::schema::{ColumnKind, ColumnSchema, TableSchema};
use crate::domain::entities::value::SqlValue;
use crate::usecase::ports::data_source::{Dialect, Statement};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanShape {
    Leaf,
    Group {
        level: usize,
        column: String,
        expandable: bool,
        count_alias: Option<String>,
    },
}

/// Statements answering one grid request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub shape: PlanShape,
    pub rows: Statement,
    pub count: Option<Statement>,
    /// Result columns whose values carry the declared kind of a table
    /// column, so the shaper can restore it.
    pub kinds: Vec<(String, ColumnKind)>,
}

impl QueryPlan {
    /// Statements in execution order: count first, then rows.
    pub fn statements(&self) -> Vec<Statement> {
        self.count
            .iter()
            .cloned()
            .chain(std::iter::once(self.rows.clone()))
            .collect()
    }
}

struct Params<'d> {
    dialect: &'d dyn Dialect,
    values: Vec<SqlValue>,
}

impl<'d> Params<'d> {
    fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    fn bind(&mut self, value: SqlValue) -> String {
        let placeholder = self.dialect.placeholder(self.values.len() + 1, &value);
        self.values.push(value);
        placeholder
    }
}

/// Translates validated requests into parameterized statements for one
/// table. Client values only ever reach the engine as bound parameters.
pub struct QueryCompiler<'a> {
    dialect: &'a dyn Dialect,
    schema: &'a TableSchema,
    table: &'a str,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(dialect: &'a dyn Dialect, schema: &'a TableSchema, table: &'a str) -> Self {
        Self {
            dialect,
            schema,
            table,
        }
    }

    pub fn compile(&self, request: &DataRequest, exact_count: bool) -> QueryPlan {
        let mut params = Params::new(self.dialect);
        let where_sql = self.where_clause(request, &mut params);
        let params = params.values;

        match request.group_column() {
            Some(column) => self.compile_group(request, column, &where_sql, params, exact_count),
            None => self.compile_leaf(request, &where_sql, params, exact_count),
        }
    }

    /// Unfiltered row count of the whole table.
    pub fn table_count(&self) -> Statement {
        let base = format!("SELECT 1 FROM {}", self.dialect.quote_table(self.table));
        Statement {
            operation: "table count",
            sql: self.dialect.count_query(&base),
            params: Vec::new(),
        }
    }

    fn quote(&self, column: &str) -> String {
        self.dialect.quote_identifier(column)
    }

    fn compile_leaf(
        &self,
        request: &DataRequest,
        where_sql: &str,
        params: Vec<SqlValue>,
        exact_count: bool,
    ) -> QueryPlan {
        let table = self.dialect.quote_table(self.table);
        let select_list = self
            .schema
            .columns
            .iter()
            .map(|column| self.dialect.project(column))
            .collect::<Vec<_>>()
            .join(", ");

        let mut order = Vec::new();
        let mut ordered: Vec<&str> = Vec::new();
        for key in &request.sort {
            if ordered.contains(&key.column.as_str()) {
                continue;
            }
            order.push(format!("{} {}", self.quote(&key.column), key.direction.sql()));
            ordered.push(key.column.as_str());
        }
        let tiebreak: Vec<&str> = if self.schema.key_columns.is_empty() {
            self.schema.column_names().collect()
        } else {
            self.schema.key_columns.iter().map(String::as_str).collect()
        };
        for column in tiebreak {
            if !ordered.contains(&column) {
                order.push(format!("{} ASC", self.quote(column)));
                ordered.push(column);
            }
        }

        let base = format!("SELECT {select_list} FROM {table}{where_sql}");
        let rows_sql = self.dialect.paginate(
            &format!("{base} ORDER BY {}", order.join(", ")),
            request.range.len(),
            request.range.start,
        );
        let count = exact_count.then(|| Statement {
            operation: "row count",
            sql: self
                .dialect
                .count_query(&format!("SELECT 1 FROM {table}{where_sql}")),
            params: params.clone(),
        });

        QueryPlan {
            shape: PlanShape::Leaf,
            rows: Statement {
                operation: "row fetch",
                sql: rows_sql,
                params,
            },
            count,
            kinds: self
                .schema
                .columns
                .iter()
                .map(|column| (column.name.clone(), column.kind))
                .collect(),
        }
    }

    fn compile_group(
        &self,
        request: &DataRequest,
        group_column: &str,
        where_sql: &str,
        params: Vec<SqlValue>,
        exact_count: bool,
    ) -> QueryPlan {
        let table = self.dialect.quote_table(self.table);
        let level = request.level();
        let group_columns: Vec<&str> = request.group_by[..=level]
            .iter()
            .map(String::as_str)
            .collect();
        let group_schemas: Vec<&ColumnSchema> = group_columns
            .iter()
            .filter_map(|column| self.schema.column(column))
            .collect();
        let group_list = group_columns
            .iter()
            .map(|column| self.quote(column))
            .collect::<Vec<_>>()
            .join(", ");

        let mut select: Vec<String> = group_schemas
            .iter()
            .map(|column| self.dialect.project(column))
            .collect();
        let mut kinds: Vec<(String, ColumnKind)> = group_schemas
            .iter()
            .map(|column| (column.name.clone(), column.kind))
            .collect();
        let mut selected: Vec<&str> = group_columns.clone();
        let mut aggregate_exprs: Vec<(&str, String)> = Vec::new();
        for agg in &request.aggregations {
            let Some(column) = self.schema.column(&agg.column) else {
                continue;
            };
            if selected.contains(&agg.column.as_str()) {
                continue;
            }
            let expr = self.dialect.aggregate(agg.func, column);
            select.push(format!("{expr} AS {}", self.quote(&agg.column)));
            if matches!(agg.func, AggregateFunction::Min | AggregateFunction::Max) {
                kinds.push((column.name.clone(), column.kind));
            }
            selected.push(agg.column.as_str());
            aggregate_exprs.push((agg.column.as_str(), expr));
        }
        let count_alias = (!selected.contains(&COUNT_ALIAS)).then(|| COUNT_ALIAS.to_string());
        if count_alias.is_some() {
            select.push(format!("COUNT(*) AS {}", self.quote(COUNT_ALIAS)));
        }

        let sortable = request.group_sortable_columns();
        let mut order = Vec::new();
        let mut ordered: Vec<&str> = Vec::new();
        for key in &request.sort {
            let column = key.column.as_str();
            if !sortable.contains(column) || ordered.contains(&column) {
                continue;
            }
            let expr = if let Some((_, expr)) =
                aggregate_exprs.iter().find(|(name, _)| *name == column)
            {
                expr.clone()
            } else if group_columns.contains(&column) {
                self.quote(column)
            } else if column == COUNT_ALIAS && count_alias.is_some() {
                "COUNT(*)".to_string()
            } else {
                continue;
            };
            order.push(format!("{expr} {}", key.direction.sql()));
            ordered.push(column);
        }
        for column in &group_columns {
            if !ordered.contains(column) {
                order.push(format!("{} ASC", self.quote(column)));
            }
        }

        let grouped = format!("FROM {table}{where_sql} GROUP BY {group_list}");
        let rows_sql = self.dialect.paginate(
            &format!(
                "SELECT {} {grouped} ORDER BY {}",
                select.join(", "),
                order.join(", ")
            ),
            request.range.len(),
            request.range.start,
        );
        let count = exact_count.then(|| Statement {
            operation: "group count",
            sql: self
                .dialect
                .count_query(&format!("SELECT {group_list} {grouped}")),
            params: params.clone(),
        });

        QueryPlan {
            shape: PlanShape::Group {
                level,
                column: group_column.to_string(),
                expandable: level + 1 < request.group_by.len(),
                count_alias,
            },
            rows: Statement {
                operation: "group fetch",
                sql: rows_sql,
                params,
            },
            count,
            kinds,
        }
    }

    fn where_clause(&self, request: &DataRequest, params: &mut Params<'_>) -> String {
        let mut predicates = Vec::new();

        for (column, key) in request.group_by.iter().zip(&request.group_path) {
            let Some(column) = self.schema.column(column) else {
                continue;
            };
            let compared = self.dialect.compare_expr(column);
            if key.is_null() {
                predicates.push(format!("{compared} IS NULL"));
            } else {
                predicates.push(format!("{compared} = {}", params.bind(key.clone())));
            }
        }

        for filter in &request.filters {
            if let Some(column) = self.schema.column(&filter.column) {
                predicates.push(self.condition_sql(column, &filter.condition, params));
            }
        }

        if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        }
    }

    fn condition_sql(
        &self,
        column: &ColumnSchema,
        condition: &FilterCondition,
        params: &mut Params<'_>,
    ) -> String {
        match condition {
            FilterCondition::Text(text) => self.text_sql(&self.quote(&column.name), text, params),
            FilterCondition::Number(range) | FilterCondition::Date(range) => {
                range_sql(&self.dialect.compare_expr(column), range, params)
            }
            FilterCondition::Set(values) => {
                set_sql(&self.dialect.compare_expr(column), values, params)
            }
            FilterCondition::Combined {
                operator,
                conditions,
            } => {
                let joiner = match operator {
                    JoinOperator::And => " AND ",
                    JoinOperator::Or => " OR ",
                };
                let parts = conditions
                    .iter()
                    .map(|inner| self.condition_sql(column, inner, params))
                    .collect::<Vec<_>>();
                format!("({})", parts.join(joiner))
            }
        }
    }

    fn text_sql(&self, column: &str, condition: &TextCondition, params: &mut Params<'_>) -> String {
        let text = self.dialect.text_expr(column);
        let like = |pattern: String, negate: bool, params: &mut Params<'_>| {
            let placeholder = params.bind(SqlValue::Text(pattern));
            let op = if negate { "NOT LIKE" } else { "LIKE" };
            format!("LOWER({text}) {op} LOWER({placeholder}) ESCAPE '\\'")
        };
        match condition {
            TextCondition::Equals(value) => {
                format!("{text} = {}", params.bind(SqlValue::Text(value.clone())))
            }
            TextCondition::NotEqual(value) => format!(
                "({column} IS NULL OR {text} <> {})",
                params.bind(SqlValue::Text(value.clone()))
            ),
            TextCondition::Contains(value) => {
                like(format!("%{}%", escape_like(value)), false, params)
            }
            TextCondition::NotContains(value) => format!(
                "({column} IS NULL OR {})",
                like(format!("%{}%", escape_like(value)), true, params)
            ),
            TextCondition::StartsWith(value) => {
                like(format!("{}%", escape_like(value)), false, params)
            }
            TextCondition::EndsWith(value) => {
                like(format!("%{}", escape_like(value)), false, params)
            }
            TextCondition::Blank => format!("({column} IS NULL OR {text} = '')"),
            TextCondition::NotBlank => format!("({column} IS NOT NULL AND {text} <> '')"),
        }
    }
}

fn range_sql(column: &str, condition: &RangeCondition<SqlValue>, params: &mut Params<'_>) -> String {
    let mut compare = |op: &str, value: &SqlValue| {
        format!("{column} {op} {}", params.bind(value.clone()))
    };
    match condition {
        RangeCondition::Equals(value) => compare("=", value),
        RangeCondition::NotEqual(value) => {
            format!("({column} IS NULL OR {})", compare("<>", value))
        }
        RangeCondition::LessThan(value) => compare("<", value),
        RangeCondition::LessThanOrEqual(value) => compare("<=", value),
        RangeCondition::GreaterThan(value) => compare(">", value),
        RangeCondition::GreaterThanOrEqual(value) => compare(">=", value),
        RangeCondition::InRange(low, high) => {
            let low = params.bind(low.clone());
            let high = params.bind(high.clone());
            format!("{column} BETWEEN {low} AND {high}")
        }
        RangeCondition::Blank => format!("{column} IS NULL"),
        RangeCondition::NotBlank => format!("{column} IS NOT NULL"),
    }
}

fn set_sql(column: &str, values: &[SqlValue], params: &mut Params<'_>) -> String {
    let includes_null = values.iter().any(SqlValue::is_null);
    let placeholders = values
        .iter()
        .filter(|value| !value.is_null())
        .map(|value| params.bind(value.clone()))
        .collect::<Vec<_>>();

    match (placeholders.is_empty(), includes_null) {
        (true, false) => "1 = 0".to_string(),
        (true, true) => format!("{column} IS NULL"),
        (false, false) => format!("{column} IN ({})", placeholders.join(", ")),
        (false, true) => format!(
            "({column} IN ({}) OR {column} IS NULL)",
            placeholders.join(", ")
        ),
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
