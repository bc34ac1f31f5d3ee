use thiserror::Error;

/// Failures returned by the row-model pipeline. Validation variants are
/// produced before any statement reaches the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SsrmError {
    #[error("invalid column `{0}`")]
    InvalidColumn(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("incompatible aggregate: `{func}` cannot be applied to {kind} column `{column}`")]
    IncompatibleAggregate {
        func: String,
        column: String,
        kind: String,
    },

    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} failed: {message}")]
    Query { operation: String, message: String },

    #[error("query exceeded the statement timeout")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,
}
