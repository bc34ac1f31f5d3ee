use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::domain::entities::schema::ColumnKind;

pub type JsonRow = Map<String, JsonValue>;

/// Outbound payload for one grid request. It echoes the window and group
/// path so a client can match responses that arrive out of order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SsrmResponse {
    pub row_data: Vec<JsonRow>,
    pub row_count: Option<u64>,
    pub start_row: u64,
    pub end_row: u64,
    pub group_keys: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub column_name: String,
    pub column_type: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub table_name: String,
    pub engine: String,
    pub total_rows: u64,
    pub columns: Vec<ColumnInfo>,
}
