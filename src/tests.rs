use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::Json;
use rusqlite::Connection;
use serde_json::{json, Value as JsonValue};

use crate::api::handlers;
use crate::api::AppState;
use crate::domain::entities::request::SsrmRequest;
use crate::domain::entities::response::SsrmResponse;
use crate::domain::error::SsrmError;
use crate::infra::import::csv::import_csv_to_sqlite;
use crate::infra::sqlite::source::SqliteSource;
use crate::infra::SourceOptions;
use crate::usecase::services::query_service::{QueryService, ServiceSettings};

pub(crate) fn unique_test_dir(prefix: &str) -> PathBuf {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after epoch")
        .as_nanos();
    let seq = SEQ.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("ssrm-{prefix}-{nanos}-{seq}"));
    fs::create_dir_all(&dir).expect("should create temp dir");
    dir
}

const DEMO_CSV: &str = "\
id,firm,sector,region,price,volume,trade_date
1,Acme,Energy,EU,10.5,100,2024-01-02
2,Beta,Energy,US,20,200,2024-01-03
3,Cobalt,Tech,US,30,300,2024-01-04
4,Delta,Tech,EU,40,400,2024-01-05
5,Echo,Tech,APAC,50,,2024-01-06
6,Foxtrot,Health,US,60,600,2024-01-07
7,Golf,Health,EU,70,700,2024-01-08
8,Hotel,Energy,APAC,80,800,2024-01-09
9,India,Finance,US,90,900,2024-01-10
10,Juliet,Finance,EU,100,1000,2024-01-11
11,Kilo,Tech,US,110,1100,2024-01-12
12,Lima,,EU,120,1200,2024-01-13
";

/// Seeds `demo_data` through the CSV importer; Lima's sector is NULL.
fn demo_db(prefix: &str) -> PathBuf {
    let dir = unique_test_dir(prefix);
    let csv_path = dir.join("demo.csv");
    fs::write(&csv_path, DEMO_CSV).expect("should write demo csv");
    let db_path = dir.join("grid.sqlite");
    import_csv_to_sqlite(&db_path, &csv_path, "demo_data", false).expect("import should succeed");

    let conn = Connection::open(&db_path).expect("should open sqlite db");
    conn.execute("UPDATE demo_data SET sector = NULL WHERE id = 12", [])
        .expect("should null one sector");
    db_path
}

fn service_with(prefix: &str, options: SourceOptions) -> QueryService {
    let db_path = demo_db(prefix);
    let source = SqliteSource::open(&db_path, "demo_data", options).expect("should open source");
    QueryService::new(Arc::new(source), ServiceSettings::default()).expect("should build service")
}

fn demo_service(prefix: &str) -> QueryService {
    service_with(prefix, SourceOptions::default())
}

fn request(value: JsonValue) -> SsrmRequest {
    serde_json::from_value(value).expect("request json should deserialize")
}

async fn fetch(service: &QueryService, value: JsonValue) -> SsrmResponse {
    service
        .query(request(value))
        .await
        .expect("query should succeed")
}

fn column<'r>(response: &'r SsrmResponse, name: &str) -> Vec<&'r JsonValue> {
    response
        .row_data
        .iter()
        .map(|row| row.get(name).unwrap_or(&JsonValue::Null))
        .collect()
}

fn ids(response: &SsrmResponse) -> Vec<i64> {
    column(response, "id")
        .into_iter()
        .filter_map(JsonValue::as_i64)
        .collect()
}

#[tokio::test]
async fn consecutive_windows_concatenate_to_the_full_ordering() {
    let service = demo_service("pagination");
    let sort = json!([{"colId": "price", "sort": "desc"}]);

    let full = fetch(&service, json!({"startRow": 0, "endRow": 100, "sortModel": sort})).await;
    let mut paged = Vec::new();
    for start in (0..15).step_by(5) {
        let window = fetch(
            &service,
            json!({"startRow": start, "endRow": start + 5, "sortModel": sort}),
        )
        .await;
        assert_eq!(window.row_count, Some(12));
        paged.extend(ids(&window));
    }

    assert_eq!(ids(&full).len(), 12);
    assert_eq!(paged, ids(&full));
    assert_eq!(ids(&full)[0], 12, "highest price first");
}

#[tokio::test]
async fn window_past_the_end_is_empty_but_still_counted() {
    let service = demo_service("past-end");

    let response = fetch(&service, json!({"startRow": 40, "endRow": 50})).await;

    assert!(response.row_data.is_empty());
    assert_eq!(response.row_count, Some(12));
    assert_eq!((response.start_row, response.end_row), (40, 50));
}

#[tokio::test]
async fn missing_window_defaults_to_first_page() {
    let service = demo_service("default-window");

    let response = fetch(&service, json!({})).await;

    assert_eq!((response.start_row, response.end_row), (0, 500));
    assert_eq!(response.row_data.len(), 12);
}

#[tokio::test]
async fn filters_on_different_columns_are_conjunctive() {
    let service = demo_service("filters");

    let response = fetch(
        &service,
        json!({
            "filterModel": {
                "firm": {"filterType": "text", "type": "contains", "filter": "O"},
                "price": {"filterType": "number", "type": "greaterThan", "filter": 50}
            }
        }),
    )
    .await;

    let mut found = ids(&response);
    found.sort_unstable();
    assert_eq!(found, vec![6, 7, 8, 11]);
    assert_eq!(response.row_count, Some(4));
}

#[tokio::test]
async fn set_and_date_filters_select_matching_rows() {
    let service = demo_service("set-date");

    let by_region = fetch(
        &service,
        json!({"filterModel": {"region": {"filterType": "set", "values": ["APAC", "EU"]}}}),
    )
    .await;
    let by_date = fetch(
        &service,
        json!({"filterModel": {"trade_date": {
            "filterType": "date",
            "type": "inRange",
            "dateFrom": "2024-01-05 00:00:00",
            "dateTo": "2024-01-03 00:00:00"
        }}}),
    )
    .await;
    let nothing = fetch(
        &service,
        json!({"filterModel": {"region": {"filterType": "set", "values": []}}}),
    )
    .await;

    assert_eq!(by_region.row_count, Some(7));
    assert_eq!(ids(&by_date), vec![2, 3, 4]);
    assert_eq!(nothing.row_count, Some(0));
}

#[tokio::test]
async fn ties_are_broken_so_windows_never_overlap() {
    let service = demo_service("stability");
    let sort = json!([{"colId": "region", "sort": "asc"}]);

    let mut seen = Vec::new();
    for start in (0..12).step_by(4) {
        let window = fetch(
            &service,
            json!({"startRow": start, "endRow": start + 4, "sortModel": sort}),
        )
        .await;
        seen.extend(ids(&window));
    }
    let again = fetch(&service, json!({"startRow": 0, "endRow": 12, "sortModel": sort})).await;

    let mut unique = seen.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 12);
    assert_eq!(seen, ids(&again));
    assert_eq!(&seen[..2], &[5, 8], "APAC rows in key order");
}

#[tokio::test]
async fn top_level_groups_carry_aggregates_and_counts() {
    let service = demo_service("groups");

    let response = fetch(
        &service,
        json!({
            "startRow": 0,
            "endRow": 10,
            "rowGroupCols": [{"id": "sector", "field": "sector"}],
            "valueCols": [
                {"id": "price", "field": "price", "aggFunc": "sum"},
                {"id": "volume", "field": "volume", "aggFunc": "avg"}
            ],
            "groupKeys": []
        }),
    )
    .await;

    assert_eq!(response.row_count, Some(5));
    assert_eq!(
        column(&response, "sector"),
        vec![
            &JsonValue::Null,
            &json!("Energy"),
            &json!("Finance"),
            &json!("Health"),
            &json!("Tech")
        ]
    );
    let energy = &response.row_data[1];
    assert_eq!(energy["price"], json!(110.5));
    assert_eq!(energy["count"], json!(3));
    assert_eq!(
        energy["_group"],
        json!({"key": "Energy", "depth": 0, "expandable": false, "childCount": 3})
    );
    let tech = &response.row_data[4];
    assert_eq!(tech["volume"], json!(600.0), "avg ignores the NULL volume");
}

#[tokio::test]
async fn drilling_into_a_group_returns_its_leaf_rows() {
    let service = demo_service("drill");
    let group = json!([{"id": "sector", "field": "sector"}]);
    let values = json!([{"id": "price", "field": "price", "aggFunc": "sum"}]);

    let groups = fetch(&service, json!({"rowGroupCols": group, "valueCols": values})).await;
    let leaves = fetch(
        &service,
        json!({"rowGroupCols": group, "valueCols": values, "groupKeys": ["Tech"]}),
    )
    .await;
    let orphans = fetch(
        &service,
        json!({"rowGroupCols": group, "valueCols": values, "groupKeys": [null]}),
    )
    .await;

    let tech = groups
        .row_data
        .iter()
        .find(|row| row["sector"] == json!("Tech"))
        .expect("tech group should exist");
    let leaf_sum: f64 = column(&leaves, "price")
        .into_iter()
        .filter_map(JsonValue::as_f64)
        .sum();
    assert_eq!(tech["price"].as_f64(), Some(leaf_sum));
    assert_eq!(tech["count"].as_u64(), leaves.row_count);
    assert_eq!(ids(&leaves), vec![3, 4, 5, 11]);
    assert_eq!(leaves.group_keys, vec![json!("Tech")]);
    assert!(leaves.row_data.iter().all(|row| !row.contains_key("_group")));
    assert_eq!(ids(&orphans), vec![12]);
}

#[tokio::test]
async fn nested_groups_are_expandable_until_the_last_level() {
    let service = demo_service("nested");
    let group = json!([{"id": "sector"}, {"id": "region"}]);

    let top = fetch(&service, json!({"rowGroupCols": group})).await;
    let regions = fetch(&service, json!({"rowGroupCols": group, "groupKeys": ["Energy"]})).await;

    assert_eq!(top.row_data[0]["_group"]["expandable"], json!(true));
    assert_eq!(column(&regions, "region"), vec![&json!("APAC"), &json!("EU"), &json!("US")]);
    assert_eq!(regions.row_data[0]["_group"]["depth"], json!(1));
    assert_eq!(regions.row_data[0]["_group"]["expandable"], json!(false));
}

#[tokio::test]
async fn groups_can_be_sorted_by_row_count() {
    let service = demo_service("group-sort");

    let response = fetch(
        &service,
        json!({
            "rowGroupCols": [{"id": "sector"}],
            "sortModel": [{"colId": "count", "sort": "desc"}, {"colId": "firm", "sort": "asc"}]
        }),
    )
    .await;

    assert_eq!(response.row_data[0]["sector"], json!("Tech"));
    assert_eq!(response.row_data[0]["count"], json!(4));
}

#[tokio::test]
async fn counting_is_idempotent_and_independent_of_the_window() {
    let service = demo_service("count");
    let filter = json!({"region": {"filterType": "text", "type": "equals", "filter": "US"}});

    let first = fetch(&service, json!({"startRow": 0, "endRow": 2, "filterModel": filter})).await;
    let second = fetch(&service, json!({"startRow": 2, "endRow": 4, "filterModel": filter})).await;
    let repeat = fetch(&service, json!({"startRow": 0, "endRow": 2, "filterModel": filter})).await;

    assert_eq!(first.row_count, Some(5));
    assert_eq!(second.row_count, Some(5));
    assert_eq!(ids(&first), ids(&repeat));
}

#[tokio::test]
async fn inexact_count_reports_unknown_row_count() {
    let service = service_with(
        "inexact",
        SourceOptions {
            exact_count: false,
            ..SourceOptions::default()
        },
    );

    let response = fetch(&service, json!({"startRow": 0, "endRow": 3})).await;

    assert_eq!(response.row_count, None);
    assert_eq!(response.row_data.len(), 3);
}

#[tokio::test]
async fn hostile_values_are_bound_not_executed() {
    let service = demo_service("injection");

    let response = fetch(
        &service,
        json!({"filterModel": {"firm": {
            "filterType": "text",
            "type": "equals",
            "filter": "x'; DROP TABLE demo_data; --"
        }}}),
    )
    .await;
    let wildcard = fetch(
        &service,
        json!({"filterModel": {"firm": {"filterType": "text", "type": "contains", "filter": "%"}}}),
    )
    .await;
    let bad_sort = service
        .query(request(json!({"sortModel": [{"colId": "price; DROP TABLE demo_data", "sort": "asc"}]})))
        .await
        .expect_err("unknown sort column");
    let info = service.table_info().await.expect("table should survive");

    assert_eq!(response.row_count, Some(0));
    assert_eq!(wildcard.row_count, Some(0), "LIKE wildcards are literal");
    assert_eq!(
        bad_sort,
        SsrmError::InvalidColumn("price; DROP TABLE demo_data".to_string())
    );
    assert_eq!(info.total_rows, 12);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_execution() {
    let service = demo_service("invalid");

    let text_sum = service
        .query(request(json!({
            "rowGroupCols": [{"id": "region"}],
            "valueCols": [{"id": "firm", "aggFunc": "sum"}]
        })))
        .await
        .expect_err("sum on text");
    let reversed = service
        .query(request(json!({"startRow": 10, "endRow": 5})))
        .await
        .expect_err("reversed window");
    let pivot = service
        .query(request(json!({"pivotMode": true})))
        .await
        .expect_err("pivot");

    assert!(matches!(text_sum, SsrmError::IncompatibleAggregate { .. }), "{text_sum:?}");
    assert!(matches!(reversed, SsrmError::InvalidRequest(_)), "{reversed:?}");
    assert!(matches!(pivot, SsrmError::InvalidRequest(_)), "{pivot:?}");
}

/// The sector walkthrough: group rows first, then the leaves of one sector.
#[tokio::test]
async fn sector_grouping_scenario() {
    let service = demo_service("sector");
    let group = json!([{"id": "sector", "displayName": "Sector", "field": "sector"}]);

    let groups = fetch(
        &service,
        json!({"startRow": 0, "endRow": 10, "rowGroupCols": group, "groupKeys": []}),
    )
    .await;
    let tech = fetch(
        &service,
        json!({"startRow": 0, "endRow": 10, "rowGroupCols": group, "groupKeys": ["Tech"]}),
    )
    .await;

    assert!(groups.row_data.len() <= 10);
    let counts: i64 = column(&groups, "count")
        .into_iter()
        .filter_map(JsonValue::as_i64)
        .sum();
    assert_eq!(counts, 12);
    assert!(column(&tech, "sector").iter().all(|sector| **sector == json!("Tech")));
    assert_eq!(tech.row_count, Some(4));
}

#[tokio::test]
async fn handlers_serve_rows_info_and_errors() {
    let state = Arc::new(AppState::new(demo_service("handlers")));

    let Json(rows) = handlers::data_ssrm(
        State(state.clone()),
        Ok(Json(request(json!({"startRow": 0, "endRow": 2})))),
    )
    .await
    .expect("handler should succeed");
    let Json(info) = handlers::table_info(State(state.clone()))
        .await
        .expect("table info should succeed");
    let Json(banner) = handlers::root(State(state.clone())).await;
    let err = handlers::data_ssrm(
        State(state),
        Ok(Json(request(json!({"sortModel": [{"colId": "nope", "sort": "asc"}]})))),
    )
    .await
    .expect_err("unknown column");

    assert_eq!(rows.row_data.len(), 2);
    assert_eq!(info.total_rows, 12);
    assert_eq!(info.columns.len(), 7);
    assert_eq!(banner.table, "demo_data");
    assert_eq!(banner.engine, "sqlite");
    assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[test]
fn response_serializes_with_grid_field_names() {
    let response = SsrmResponse {
        row_data: Vec::new(),
        row_count: None,
        start_row: 0,
        end_row: 100,
        group_keys: vec![json!("Tech")],
    };

    let value = serde_json::to_value(&response).expect("serialize");

    assert_eq!(
        value,
        json!({"rowData": [], "rowCount": null, "startRow": 0, "endRow": 100, "groupKeys": ["Tech"]})
    );
}

/// Quote timestamps and flags stored the way SQLite keeps them: text and
/// integers.
fn quotes_service(prefix: &str) -> QueryService {
    let dir = unique_test_dir(prefix);
    let db_path = dir.join("quotes.sqlite");
    let conn = Connection::open(&db_path).expect("should create sqlite db");
    conn.execute_batch(
        "CREATE TABLE quotes (id INTEGER PRIMARY KEY, listed TIMESTAMP, active BOOLEAN);
         INSERT INTO quotes VALUES
             (1, '2024-01-02 09:30:00', 1),
             (2, '2024-01-02 15:00:00', 0),
             (3, '2024-01-03 10:00:00', 1);",
    )
    .expect("should seed quotes");
    drop(conn);
    let source = SqliteSource::open(&db_path, "quotes", SourceOptions::default())
        .expect("should open source");
    QueryService::new(Arc::new(source), ServiceSettings::default()).expect("should build service")
}

#[tokio::test]
async fn leaf_values_follow_declared_column_types() {
    let service = quotes_service("declared_types");

    let page = fetch(&service, json!({"startRow": 0, "endRow": 1})).await;
    let by_flag = fetch(
        &service,
        json!({"rowGroupCols": [{"id": "active"}], "sortModel": [{"colId": "active", "sort": "desc"}]}),
    )
    .await;

    assert_eq!(
        JsonValue::Object(page.row_data[0].clone()),
        json!({"id": 1, "listed": "2024-01-02T09:30:00", "active": true})
    );
    assert_eq!(column(&by_flag, "active"), vec![&json!(true), &json!(false)]);
}

#[tokio::test]
async fn date_filters_on_timestamps_match_whole_days() {
    let service = quotes_service("timestamp_days");
    let date_filter = |kind: &str| {
        json!({"filterModel": {"listed": {
            "filterType": "date", "type": kind, "dateFrom": "2024-01-02 00:00:00"
        }}})
    };

    let same_day = fetch(&service, date_filter("equals")).await;
    let later = fetch(&service, date_filter("greaterThan")).await;
    let other_days = fetch(&service, date_filter("notEqual")).await;

    assert_eq!(ids(&same_day), vec![1, 2]);
    assert_eq!(same_day.row_count, Some(2));
    assert_eq!(ids(&later), vec![3]);
    assert_eq!(ids(&other_days), vec![3]);
}

/// `slow_view` is a three-way cross join: a full scan runs for minutes, but
/// pinning every column turns it into three key lookups.
fn slow_view_service(prefix: &str, settings: ServiceSettings) -> QueryService {
    let dir = unique_test_dir(prefix);
    let db_path = dir.join("slow.sqlite");
    let conn = Connection::open(&db_path).expect("should create sqlite db");
    conn.execute_batch(
        "CREATE TABLE nums (n INTEGER PRIMARY KEY);
         WITH RECURSIVE seq(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM seq WHERE x < 2000)
         INSERT INTO nums SELECT x FROM seq;
         CREATE VIEW slow_view AS SELECT a.n AS n, b.n AS m, c.n AS k FROM nums a, nums b, nums c;",
    )
    .expect("should seed slow view");
    drop(conn);
    let source = SqliteSource::open(&db_path, "slow_view", SourceOptions::default())
        .expect("should open source");
    QueryService::new(Arc::new(source), settings).expect("should build service")
}

#[tokio::test]
async fn abandoned_requests_free_their_slot() {
    let service = slow_view_service(
        "abandoned",
        ServiceSettings {
            max_in_flight: 1,
            acquire_timeout: Duration::from_secs(2),
            ..ServiceSettings::default()
        },
    );
    let equals = |value: i64| json!({"filterType": "number", "type": "equals", "filter": value});

    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), service.query(request(json!({})))).await;
    let started = Instant::now();
    let pinned = fetch(
        &service,
        json!({"filterModel": {"n": equals(1), "m": equals(2), "k": equals(3)}}),
    )
    .await;

    assert!(abandoned.is_err(), "full scan should outlive the client");
    assert_eq!(pinned.row_count, Some(1));
    assert_eq!(
        JsonValue::Object(pinned.row_data[0].clone()),
        json!({"n": 1, "m": 2, "k": 3})
    );
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "slot freed after {:?}",
        started.elapsed()
    );
}
