mod error;
pub(crate) mod handlers;
mod state;

pub use error::ApiError;
pub use state::AppState;

use anyhow::{Context, Result};
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// CORS for the configured origins; an empty list or `*` allows any origin.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let allow_origin = if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        AllowOrigin::from(Any)
    } else {
        let values = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid allowed origin: {origin}"))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(values)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600)))
}

/// Build the application router
pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/table-info", get(handlers::table_info))
        .route("/data-ssrm", post(handlers::data_ssrm))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
