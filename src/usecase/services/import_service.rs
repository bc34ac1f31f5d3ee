use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::infra::import::csv::{import_csv_to_sqlite, ImportResult};

/// Seeds the SQLite database the server reads from.
pub struct ImportService {
    db_path: PathBuf,
}

impl ImportService {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn import_csv(&self, path: &Path, table: &str, replace: bool) -> Result<ImportResult> {
        import_csv_to_sqlite(&self.db_path, path, table, replace)
    }
}
