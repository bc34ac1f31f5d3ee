use chrono::{NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::domain::entities::schema::{parse_client_datetime, ColumnKind};
use crate::domain::entities::value::{SqlValue, DATE_FORMAT, SQL_TIMESTAMP_FORMAT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextFilterType {
    Equals,
    NotEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Blank,
    NotBlank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalarFilterType {
    Equals,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    InRange,
    Blank,
    NotBlank,
}

/// One entry of the grid's `filterModel`, as sent on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType", rename_all = "lowercase")]
pub enum FilterModel {
    Text(TextFilterModel),
    Number(NumberFilterModel),
    Date(DateFilterModel),
    Set(SetFilterModel),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextFilterModel {
    #[serde(rename = "type")]
    pub filter_type: Option<TextFilterType>,
    pub filter: Option<String>,
    pub operator: Option<JoinOperator>,
    #[serde(default)]
    pub conditions: Vec<TextFilterModel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberFilterModel {
    #[serde(rename = "type")]
    pub filter_type: Option<ScalarFilterType>,
    pub filter: Option<f64>,
    pub filter_to: Option<f64>,
    pub operator: Option<JoinOperator>,
    #[serde(default)]
    pub conditions: Vec<NumberFilterModel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateFilterModel {
    #[serde(rename = "type")]
    pub filter_type: Option<ScalarFilterType>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub operator: Option<JoinOperator>,
    #[serde(default)]
    pub conditions: Vec<DateFilterModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetFilterModel {
    #[serde(default)]
    pub values: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextCondition {
    Equals(String),
    NotEqual(String),
    Contains(String),
    NotContains(String),
    StartsWith(String),
    EndsWith(String),
    Blank,
    NotBlank,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeCondition<T> {
    Equals(T),
    NotEqual(T),
    LessThan(T),
    LessThanOrEqual(T),
    GreaterThan(T),
    GreaterThanOrEqual(T),
    InRange(T, T),
    Blank,
    NotBlank,
}

impl<T> RangeCondition<T> {
    pub fn map<U>(self, f: impl Fn(T) -> U) -> RangeCondition<U> {
        match self {
            RangeCondition::Equals(value) => RangeCondition::Equals(f(value)),
            RangeCondition::NotEqual(value) => RangeCondition::NotEqual(f(value)),
            RangeCondition::LessThan(value) => RangeCondition::LessThan(f(value)),
            RangeCondition::LessThanOrEqual(value) => RangeCondition::LessThanOrEqual(f(value)),
            RangeCondition::GreaterThan(value) => RangeCondition::GreaterThan(f(value)),
            RangeCondition::GreaterThanOrEqual(value) => {
                RangeCondition::GreaterThanOrEqual(f(value))
            }
            RangeCondition::InRange(low, high) => RangeCondition::InRange(f(low), f(high)),
            RangeCondition::Blank => RangeCondition::Blank,
            RangeCondition::NotBlank => RangeCondition::NotBlank,
        }
    }
}

/// Validated filter condition for one column.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Text(TextCondition),
    Number(RangeCondition<SqlValue>),
    Date(RangeCondition<SqlValue>),
    Set(Vec<SqlValue>),
    Combined {
        operator: JoinOperator,
        conditions: Vec<FilterCondition>,
    },
}

impl FilterModel {
    /// Converts the wire shape into a typed condition for a column of
    /// `kind`. Errors are plain messages; the caller attaches the column.
    pub fn into_condition(self, kind: ColumnKind) -> Result<FilterCondition, String> {
        match self {
            FilterModel::Text(model) => text_condition(model),
            FilterModel::Number(model) => {
                if !kind.is_numeric() {
                    return Err(format!("number filter on a {kind:?} column"));
                }
                number_condition(model, kind)
            }
            FilterModel::Date(model) => {
                if !kind.is_temporal() && kind != ColumnKind::Text {
                    return Err(format!("date filter on a {kind:?} column"));
                }
                date_condition(model, kind)
            }
            FilterModel::Set(model) => model
                .values
                .iter()
                .map(|value| kind.coerce(value))
                .collect::<Result<Vec<_>, _>>()
                .map(FilterCondition::Set),
        }
    }
}

fn combine<M>(
    operator: JoinOperator,
    conditions: Vec<M>,
    convert: impl Fn(M) -> Result<FilterCondition, String>,
) -> Result<FilterCondition, String> {
    if conditions.is_empty() {
        return Err("combined filter has no conditions".to_string());
    }
    let conditions = conditions
        .into_iter()
        .map(convert)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FilterCondition::Combined {
        operator,
        conditions,
    })
}

fn text_condition(model: TextFilterModel) -> Result<FilterCondition, String> {
    if let Some(operator) = model.operator {
        return combine(operator, model.conditions, text_condition);
    }
    let filter_type = model.filter_type.unwrap_or(TextFilterType::Contains);
    let value = || {
        model
            .filter
            .clone()
            .ok_or_else(|| format!("text filter `{filter_type:?}` requires a `filter` value"))
    };
    let condition = match filter_type {
        TextFilterType::Equals => TextCondition::Equals(value()?),
        TextFilterType::NotEqual => TextCondition::NotEqual(value()?),
        TextFilterType::Contains => TextCondition::Contains(value()?),
        TextFilterType::NotContains => TextCondition::NotContains(value()?),
        TextFilterType::StartsWith => TextCondition::StartsWith(value()?),
        TextFilterType::EndsWith => TextCondition::EndsWith(value()?),
        TextFilterType::Blank => TextCondition::Blank,
        TextFilterType::NotBlank => TextCondition::NotBlank,
    };
    Ok(FilterCondition::Text(condition))
}

fn range_condition<T>(
    filter_type: ScalarFilterType,
    from: Option<T>,
    to: Option<T>,
) -> Result<RangeCondition<T>, String> {
    let missing = || format!("filter `{filter_type:?}` requires a value");
    let condition = match filter_type {
        ScalarFilterType::Equals => RangeCondition::Equals(from.ok_or_else(missing)?),
        ScalarFilterType::NotEqual => RangeCondition::NotEqual(from.ok_or_else(missing)?),
        ScalarFilterType::LessThan => RangeCondition::LessThan(from.ok_or_else(missing)?),
        ScalarFilterType::LessThanOrEqual => {
            RangeCondition::LessThanOrEqual(from.ok_or_else(missing)?)
        }
        ScalarFilterType::GreaterThan => RangeCondition::GreaterThan(from.ok_or_else(missing)?),
        ScalarFilterType::GreaterThanOrEqual => {
            RangeCondition::GreaterThanOrEqual(from.ok_or_else(missing)?)
        }
        ScalarFilterType::InRange => {
            let low = from.ok_or_else(missing)?;
            let high = to.ok_or_else(|| "inRange filter requires an upper bound".to_string())?;
            RangeCondition::InRange(low, high)
        }
        ScalarFilterType::Blank => RangeCondition::Blank,
        ScalarFilterType::NotBlank => RangeCondition::NotBlank,
    };
    Ok(condition)
}

fn number_condition(model: NumberFilterModel, kind: ColumnKind) -> Result<FilterCondition, String> {
    if let Some(operator) = model.operator {
        return combine(operator, model.conditions, |inner| {
            number_condition(inner, kind)
        });
    }
    let bind = |value: f64| match kind {
        ColumnKind::Integer if value.fract() == 0.0 => SqlValue::Integer(value as i64),
        _ => SqlValue::Real(value),
    };
    let condition = range_condition(
        model.filter_type.unwrap_or(ScalarFilterType::Equals),
        model.filter.map(bind),
        model.filter_to.map(bind),
    )?;
    Ok(FilterCondition::Number(ordered_range(condition, |low, high| {
        numeric(low) > numeric(high)
    })))
}

fn date_condition(model: DateFilterModel, kind: ColumnKind) -> Result<FilterCondition, String> {
    if let Some(operator) = model.operator {
        return combine(operator, model.conditions, |inner| date_condition(inner, kind));
    }
    let parse = |text: String| -> Result<NaiveDateTime, String> {
        parse_client_datetime(&text).ok_or_else(|| format!("`{text}` is not a date"))
    };
    let from = model.date_from.map(parse).transpose()?;
    let to = model.date_to.map(parse).transpose()?;
    let condition = ordered_range(
        range_condition(
            model.filter_type.unwrap_or(ScalarFilterType::Equals),
            from,
            to,
        )?,
        |low, high| low > high,
    );
    match kind {
        ColumnKind::Date => Ok(FilterCondition::Date(
            condition.map(|value| SqlValue::Date(value.date())),
        )),
        ColumnKind::Timestamp => whole_days(condition),
        // Text columns holding dates compare as text in ISO layout.
        _ => Ok(FilterCondition::Date(condition.map(|value| {
            if value.time() == NaiveTime::MIN {
                SqlValue::Text(value.format(DATE_FORMAT).to_string())
            } else {
                SqlValue::Text(value.format(SQL_TIMESTAMP_FORMAT).to_string())
            }
        }))),
    }
}

/// Start of `value`'s day and start of the following day.
fn day_bounds(value: NaiveDateTime) -> Result<(SqlValue, SqlValue), String> {
    let day = value.date();
    let next = day
        .succ_opt()
        .ok_or_else(|| format!("`{day}` is out of range"))?;
    Ok((
        SqlValue::Timestamp(day.and_time(NaiveTime::MIN)),
        SqlValue::Timestamp(next.and_time(NaiveTime::MIN)),
    ))
}

/// Date filters on timestamp columns match whole calendar days.
fn whole_days(condition: RangeCondition<NaiveDateTime>) -> Result<FilterCondition, String> {
    let date = FilterCondition::Date;
    let joined = |operator, conditions| FilterCondition::Combined {
        operator,
        conditions,
    };
    let condition = match condition {
        RangeCondition::Equals(value) => {
            let (start, next) = day_bounds(value)?;
            joined(
                JoinOperator::And,
                vec![
                    date(RangeCondition::GreaterThanOrEqual(start)),
                    date(RangeCondition::LessThan(next)),
                ],
            )
        }
        RangeCondition::NotEqual(value) => {
            let (start, next) = day_bounds(value)?;
            joined(
                JoinOperator::Or,
                vec![
                    date(RangeCondition::Blank),
                    date(RangeCondition::LessThan(start)),
                    date(RangeCondition::GreaterThanOrEqual(next)),
                ],
            )
        }
        RangeCondition::LessThan(value) => date(RangeCondition::LessThan(day_bounds(value)?.0)),
        RangeCondition::LessThanOrEqual(value) => {
            date(RangeCondition::LessThan(day_bounds(value)?.1))
        }
        RangeCondition::GreaterThan(value) => {
            date(RangeCondition::GreaterThanOrEqual(day_bounds(value)?.1))
        }
        RangeCondition::GreaterThanOrEqual(value) => {
            date(RangeCondition::GreaterThanOrEqual(day_bounds(value)?.0))
        }
        RangeCondition::InRange(low, high) => joined(
            JoinOperator::And,
            vec![
                date(RangeCondition::GreaterThanOrEqual(day_bounds(low)?.0)),
                date(RangeCondition::LessThan(day_bounds(high)?.1)),
            ],
        ),
        RangeCondition::Blank => date(RangeCondition::Blank),
        RangeCondition::NotBlank => date(RangeCondition::NotBlank),
    };
    Ok(condition)
}

fn numeric(value: &SqlValue) -> f64 {
    match value {
        SqlValue::Integer(value) => *value as f64,
        SqlValue::Real(value) => *value,
        _ => f64::NAN,
    }
}

/// `BETWEEN` requires low <= high; swap reversed bounds.
fn ordered_range<T>(
    condition: RangeCondition<T>,
    reversed: impl Fn(&T, &T) -> bool,
) -> RangeCondition<T> {
    match condition {
        RangeCondition::InRange(low, high) if reversed(&low, &high) => {
            RangeCondition::InRange(high, low)
        }
        other => other,
    }
}
