use std::time::Duration;

pub mod import;
pub mod pool;
pub mod postgres;
pub mod sqlite;

/// Knobs shared by every engine adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOptions {
    pub pool_size: usize,
    pub statement_timeout: Duration,
    /// When false, grid responses report an unknown row count instead of
    /// running a count statement.
    pub exact_count: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            pool_size: 4,
            statement_timeout: Duration::from_secs(30),
            exact_count: true,
        }
    }
}
