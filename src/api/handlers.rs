use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use super::error::ApiError;
use super::state::AppState;
use crate::domain::entities::request::SsrmRequest;
use crate::domain::entities::response::{SsrmResponse, TableInfo};

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub engine: &'static str,
    pub table: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET / - Service banner
pub async fn root(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: "Server-side row model backend for data grids",
        engine: state.service.engine(),
        table: state.service.table_name().to_string(),
    })
}

/// GET /health - Liveness check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /table-info - Columns and total row count of the served table
pub async fn table_info(State(state): State<Arc<AppState>>) -> Result<Json<TableInfo>, ApiError> {
    Ok(Json(state.service.table_info().await?))
}

/// POST /data-ssrm - One window of grid rows
pub async fn data_ssrm(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SsrmRequest>, JsonRejection>,
) -> Result<Json<SsrmResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.service.query(request).await?))
}
