use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ssrm_backend::api::{self, AppState};
use ssrm_backend::config::{Cli, Command, Engine, ImportArgs, ServeArgs};
use ssrm_backend::infra::postgres::source::PostgresSource;
use ssrm_backend::infra::sqlite::source::SqliteSource;
use ssrm_backend::usecase::ports::data_source::DataSource;
use ssrm_backend::usecase::services::import_service::ImportService;
use ssrm_backend::usecase::services::query_service::QueryService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Import(args) => import(args),
    }
}

fn open_source(args: &ServeArgs) -> Result<Arc<dyn DataSource>> {
    let options = args.source_options();
    let source: Arc<dyn DataSource> = match args.engine {
        Engine::Sqlite => {
            let db_path = args.database_path()?;
            tracing::info!(path = %db_path.display(), "opening sqlite database");
            Arc::new(
                SqliteSource::open(db_path, args.table.clone(), options)
                    .context("failed to open sqlite source")?,
            )
        }
        Engine::Postgres => Arc::new(
            PostgresSource::connect(args.postgres_url()?, args.table.clone(), options)
                .context("failed to connect to postgres")?,
        ),
    };
    Ok(source)
}

async fn serve(args: ServeArgs) -> Result<()> {
    // The engine clients block, so startup I/O runs off the async workers.
    let open_args = args.clone();
    let service = tokio::task::spawn_blocking(move || -> Result<QueryService> {
        let source = open_source(&open_args)?;
        QueryService::new(source, open_args.service_settings())
            .context("failed to describe table")
    })
    .await
    .context("startup task failed")??;
    let state = Arc::new(AppState::new(service));
    let result = run_server(&args, state.clone()).await;
    AppState::release(state).await;
    result
}

async fn run_server(args: &ServeArgs, state: Arc<AppState>) -> Result<()> {
    let app = api::router(state, api::cors_layer(&args.allowed_origins)?);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(addr = %args.bind, table = %args.table, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
    }
}

fn import(args: ImportArgs) -> Result<()> {
    let service = ImportService::new(args.database_path()?);
    let result = service.import_csv(&args.csv, &args.table, args.replace)?;
    println!(
        "imported {} rows into `{}` ({})",
        result.row_count,
        result.table,
        service.db_path().display()
    );
    Ok(())
}
