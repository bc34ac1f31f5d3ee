use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::domain::entities::request::{RequestLimits, DEFAULT_PAGE_SIZE};
use crate::infra::SourceOptions;
use crate::usecase::services::query_service::ServiceSettings;

pub const DEFAULT_TABLE: &str = "demo_data";

/// Server-side row model backend for data grids
#[derive(Debug, Parser)]
#[command(name = "ssrm-backend")]
#[command(about = "Serves filtered, sorted, grouped and paginated table windows to data grids")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve grid requests over HTTP
    Serve(ServeArgs),
    /// Load a CSV file into a SQLite table
    Import(ImportArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "SSRM_ENGINE", value_enum, default_value_t = Engine::Sqlite)]
    pub engine: Engine,

    /// SQLite file (defaults to the platform data directory)
    #[arg(long, env = "SSRM_DATABASE")]
    pub database: Option<PathBuf>,

    /// e.g. `host=localhost user=grid dbname=grid`
    #[arg(long, env = "SSRM_POSTGRES_URL")]
    pub postgres_url: Option<String>,

    #[arg(long, env = "SSRM_TABLE", default_value = DEFAULT_TABLE)]
    pub table: String,

    #[arg(long, env = "SSRM_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Connections kept open and requests allowed in flight
    #[arg(long, env = "SSRM_POOL_SIZE", default_value_t = 4)]
    pub pool_size: usize,

    #[arg(long, env = "SSRM_STATEMENT_TIMEOUT_MS", default_value_t = 30_000)]
    pub statement_timeout_ms: u64,

    /// How long a request waits for a free connection
    #[arg(long, env = "SSRM_ACQUIRE_TIMEOUT_MS", default_value_t = 5_000)]
    pub acquire_timeout_ms: u64,

    #[arg(long, env = "SSRM_MAX_PAGE_SIZE", default_value_t = 10_000)]
    pub max_page_size: u64,

    /// Skip count statements; responses report an unknown row count
    #[arg(long, env = "SSRM_INEXACT_COUNT")]
    pub inexact_count: bool,

    /// Repeatable; `*` or none allows any origin
    #[arg(long = "allowed-origin", env = "SSRM_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,
}

impl ServeArgs {
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => default_db_path(),
        }
    }

    pub fn postgres_url(&self) -> Result<&str> {
        self.postgres_url
            .as_deref()
            .ok_or_else(|| anyhow!("--postgres-url is required for the postgres engine"))
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            pool_size: self.pool_size.max(1),
            statement_timeout: Duration::from_millis(self.statement_timeout_ms),
            exact_count: !self.inexact_count,
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            limits: RequestLimits {
                default_page_size: DEFAULT_PAGE_SIZE.min(self.max_page_size),
                max_page_size: self.max_page_size,
            },
            max_in_flight: self.pool_size.max(1),
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    #[arg(long)]
    pub csv: PathBuf,

    #[arg(long, env = "SSRM_DATABASE")]
    pub database: Option<PathBuf>,

    #[arg(long, env = "SSRM_TABLE", default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Drop the table first if it already exists
    #[arg(long)]
    pub replace: bool,
}

impl ImportArgs {
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => default_db_path(),
        }
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "ssrm", "ssrm-backend")
        .ok_or_else(|| anyhow!("unable to resolve data directory"))?;
    Ok(project_dirs.data_local_dir().join("grid.sqlite"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults_derive_service_settings() {
        let cli = Cli::parse_from(["ssrm-backend", "serve", "--database", "grid.db"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        assert_eq!(args.engine, Engine::Sqlite);
        assert_eq!(args.table, DEFAULT_TABLE);
        assert_eq!(args.source_options(), SourceOptions::default());
        let settings = args.service_settings();
        assert_eq!(settings.limits, RequestLimits::default());
        assert_eq!(settings.max_in_flight, 4);
    }

    #[test]
    fn serve_flags_override_defaults() {
        let cli = Cli::parse_from([
            "ssrm-backend",
            "serve",
            "--engine",
            "postgres",
            "--postgres-url",
            "host=db user=grid",
            "--max-page-size",
            "200",
            "--inexact-count",
            "--allowed-origin",
            "http://localhost:3000",
            "--allowed-origin",
            "http://localhost:5173",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        assert_eq!(args.engine, Engine::Postgres);
        assert_eq!(args.postgres_url().expect("url"), "host=db user=grid");
        assert!(!args.source_options().exact_count);
        assert_eq!(args.service_settings().limits.default_page_size, 200);
        assert_eq!(args.allowed_origins.len(), 2);
    }

    #[test]
    fn postgres_without_url_is_an_error() {
        let cli = Cli::parse_from(["ssrm-backend", "serve", "--engine", "postgres"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        assert!(args.postgres_url().is_err());
    }
}
