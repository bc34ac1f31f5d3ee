use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use crate::domain::entities::filter::{FilterCondition, FilterModel};
use crate::domain::entities::schema::{ColumnSchema, TableSchema};
use crate::domain::entities::value::SqlValue;
use crate::domain::error::SsrmError;

pub const DEFAULT_PAGE_SIZE: u64 = 500;

/// Alias of the implicit per-group row count.
pub const COUNT_ALIAS: &str = "count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortModelItem {
    pub col_id: String,
    pub sort: SortDirection,
}

/// Column descriptor used by `rowGroupCols`, `valueCols` and `pivotCols`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnVo {
    pub id: String,
    pub display_name: Option<String>,
    pub field: Option<String>,
    pub agg_func: Option<String>,
}

impl ColumnVo {
    pub fn column_id(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.id)
    }
}

/// Inbound grid request as sent by the server-side row model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SsrmRequest {
    pub start_row: Option<u64>,
    pub end_row: Option<u64>,
    #[serde(deserialize_with = "null_as_default")]
    pub sort_model: Vec<SortModelItem>,
    pub filter_model: Option<BTreeMap<String, FilterModel>>,
    #[serde(deserialize_with = "null_as_default")]
    pub row_group_cols: Vec<ColumnVo>,
    #[serde(deserialize_with = "null_as_default")]
    pub group_keys: Vec<JsonValue>,
    #[serde(deserialize_with = "null_as_default")]
    pub value_cols: Vec<ColumnVo>,
    #[serde(deserialize_with = "null_as_default")]
    pub pivot_cols: Vec<ColumnVo>,
    #[serde(deserialize_with = "null_as_default")]
    pub pivot_mode: bool,
}

/// Grids send `null` for list fields they have nothing for.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub default_page_size: u64,
    pub max_page_size: u64,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: 10_000,
        }
    }
}

/// Half-open row window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: u64,
    pub end: u64,
}

impl RowRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    pub column: String,
    pub condition: FilterCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            _ => None,
        }
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Count => "COUNT",
        }
    }

    pub fn requires_numeric(self) -> bool {
        matches!(self, Self::Sum | Self::Avg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationSpec {
    pub column: String,
    pub func: AggregateFunction,
}

/// Validated, immutable form of one grid request. Every column it names
/// exists in the schema and every value it carries is typed for its column.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub range: RowRange,
    pub sort: Vec<SortKey>,
    pub filters: Vec<ColumnFilter>,
    pub group_by: Vec<String>,
    pub group_path: Vec<SqlValue>,
    pub aggregations: Vec<AggregationSpec>,
}

impl DataRequest {
    pub fn from_wire(
        request: SsrmRequest,
        schema: &TableSchema,
        limits: &RequestLimits,
    ) -> Result<Self, SsrmError> {
        if request.pivot_mode || !request.pivot_cols.is_empty() {
            return Err(SsrmError::InvalidRequest(
                "pivot mode is not supported".to_string(),
            ));
        }

        let start = request.start_row.unwrap_or(0);
        let end = request
            .end_row
            .unwrap_or_else(|| start.saturating_add(limits.default_page_size));
        if end < start {
            return Err(SsrmError::InvalidRequest(format!(
                "endRow {end} is before startRow {start}"
            )));
        }
        // Engines take LIMIT and OFFSET as signed 64-bit integers.
        if end > i64::MAX as u64 {
            return Err(SsrmError::InvalidRequest(format!(
                "endRow {end} is out of range"
            )));
        }
        if end - start > limits.max_page_size {
            return Err(SsrmError::InvalidRequest(format!(
                "requested {} rows, the maximum window is {}",
                end - start,
                limits.max_page_size
            )));
        }

        let mut group_by = Vec::with_capacity(request.row_group_cols.len());
        for column in &request.row_group_cols {
            let column_id = column.column_id();
            require_column(schema, column_id)?;
            if group_by.iter().any(|existing: &String| existing == column_id) {
                return Err(SsrmError::InvalidRequest(format!(
                    "column `{column_id}` is grouped more than once"
                )));
            }
            group_by.push(column_id.to_string());
        }

        if request.group_keys.len() > group_by.len() {
            return Err(SsrmError::InvalidRequest(format!(
                "{} group keys supplied for {} grouping columns",
                request.group_keys.len(),
                group_by.len()
            )));
        }
        let mut group_path = Vec::with_capacity(request.group_keys.len());
        for (key, column_id) in request.group_keys.iter().zip(&group_by) {
            let kind = require_column(schema, column_id)?.kind;
            let value = kind.coerce(key).map_err(|message| {
                SsrmError::InvalidRequest(format!("group key for `{column_id}`: {message}"))
            })?;
            group_path.push(value);
        }

        let mut aggregations: Vec<AggregationSpec> = Vec::new();
        for value_col in &request.value_cols {
            let column_id = value_col.column_id();
            let column = require_column(schema, column_id)?;
            let func_name = value_col.agg_func.as_deref().unwrap_or("sum");
            let func = AggregateFunction::from_name(func_name).ok_or_else(|| {
                SsrmError::InvalidRequest(format!(
                    "unsupported aggregate function `{func_name}` on `{column_id}`"
                ))
            })?;
            if func.requires_numeric() && !column.kind.is_numeric() {
                return Err(SsrmError::IncompatibleAggregate {
                    func: func_name.to_string(),
                    column: column_id.to_string(),
                    kind: format!("{:?}", column.kind).to_lowercase(),
                });
            }
            if aggregations.iter().any(|agg| agg.column == column_id) {
                return Err(SsrmError::InvalidRequest(format!(
                    "column `{column_id}` is aggregated more than once"
                )));
            }
            aggregations.push(AggregationSpec {
                column: column_id.to_string(),
                func,
            });
        }

        let at_group_level = group_path.len() < group_by.len();
        let mut sort = Vec::with_capacity(request.sort_model.len());
        for item in request.sort_model {
            let is_count_alias = at_group_level
                && item.col_id == COUNT_ALIAS
                && schema.column(COUNT_ALIAS).is_none();
            if !is_count_alias {
                require_column(schema, &item.col_id)?;
            }
            sort.push(SortKey {
                column: item.col_id,
                direction: item.sort,
            });
        }

        let mut filters = Vec::new();
        for (column_id, model) in request.filter_model.unwrap_or_default() {
            let kind = require_column(schema, &column_id)?.kind;
            let condition = model.into_condition(kind).map_err(|message| {
                SsrmError::InvalidRequest(format!("filter on `{column_id}`: {message}"))
            })?;
            filters.push(ColumnFilter {
                column: column_id,
                condition,
            });
        }

        Ok(Self {
            range: RowRange { start, end },
            sort,
            filters,
            group_by,
            group_path,
            aggregations,
        })
    }

    /// Current drill depth: the number of group keys already fixed.
    pub fn level(&self) -> usize {
        self.group_path.len()
    }

    /// Grouping column expanded by this request, if it asks for group rows.
    pub fn group_column(&self) -> Option<&str> {
        self.group_by.get(self.level()).map(String::as_str)
    }

    /// Columns a group-level request may sort on: the grouping columns down
    /// to the expanded level, the aggregated columns and the row count.
    pub fn group_sortable_columns(&self) -> BTreeSet<&str> {
        let mut allowed: BTreeSet<&str> = self
            .group_by
            .iter()
            .take(self.level() + 1)
            .map(String::as_str)
            .collect();
        allowed.extend(self.aggregations.iter().map(|agg| agg.column.as_str()));
        allowed.insert(COUNT_ALIAS);
        allowed
    }
}

fn require_column<'s>(
    schema: &'s TableSchema,
    column_id: &str,
) -> Result<&'s ColumnSchema, SsrmError> {
    schema
        .column(column_id)
        .ok_or_else(|| SsrmError::InvalidColumn(column_id.to_string()))
}
