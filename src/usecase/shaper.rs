use serde_json::{json, Value as JsonValue};

use crate::domain::entities::response::JsonRow;
use crate::domain::entities::schema::ColumnKind;
use crate::domain::entities::value::Row;
use crate::usecase::compiler::PlanShape;

pub const GROUP_META_KEY: &str = "_group";

/// Turns engine rows into grid rows. Cells listed in `kinds` are rendered
/// as their declared kind whatever the engine stored. Group rows gain a
/// `_group` object carrying the key, depth, whether it can be expanded and
/// its row count.
pub fn shape_rows(
    shape: &PlanShape,
    kinds: &[(String, ColumnKind)],
    rows: Vec<Row>,
) -> Vec<JsonRow> {
    rows.into_iter()
        .map(|row| shape_row(shape, conform_row(kinds, row)))
        .collect()
}

fn conform_row(kinds: &[(String, ColumnKind)], row: Row) -> Row {
    Row::new(
        row.cells
            .into_iter()
            .map(|(name, value)| {
                let value = match kinds.iter().find(|(column, _)| *column == name) {
                    Some((_, kind)) => kind.conform(value),
                    None => value,
                };
                (name, value)
            })
            .collect(),
    )
}

fn shape_row(shape: &PlanShape, row: Row) -> JsonRow {
    let mut object: JsonRow = row
        .cells
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();

    if let PlanShape::Group {
        level,
        column,
        expandable,
        count_alias,
    } = shape
    {
        let key = row.get(column).map(|value| value.to_json()).unwrap_or(JsonValue::Null);
        let child_count = count_alias
            .as_deref()
            .and_then(|alias| row.get(alias))
            .and_then(|value| value.as_i64());
        object.insert(
            GROUP_META_KEY.to_string(),
            json!({
                "key": key,
                "depth": level,
                "expandable": expandable,
                "childCount": child_count,
            }),
        );
    }

    object
}

/// Reads a `COUNT(*)` result: first column of the first row.
pub fn count_from_rows(rows: &[Row]) -> Option<u64> {
    rows.first()
        .and_then(Row::first)
        .and_then(|value| value.as_i64())
        .map(|count| count.max(0) as u64)
}
