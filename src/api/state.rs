use std::sync::Arc;

use crate::usecase::services::query_service::QueryService;

/// Shared application state
pub struct AppState {
    pub service: QueryService,
}

impl AppState {
    pub fn new(service: QueryService) -> Self {
        Self { service }
    }

    /// Drops `state` on a blocking worker. Pooled engine clients may block
    /// while closing, which is not allowed on an async worker.
    pub async fn release(state: Arc<Self>) {
        if let Err(err) = tokio::task::spawn_blocking(move || drop(state)).await {
            tracing::warn!(error = %err, "failed to release application state");
        }
    }
}
