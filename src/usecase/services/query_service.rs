use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::domain::entities::request::{DataRequest, RequestLimits, SsrmRequest};
use crate::domain::entities::response::{ColumnInfo, SsrmResponse, TableInfo};
use crate::domain::entities::schema::TableSchema;
use crate::domain::entities::value::Row;
use crate::domain::error::SsrmError;
use crate::usecase::compiler::{QueryCompiler, QueryPlan};
use crate::usecase::ports::data_source::{CancelFlag, DataSource, Statement};
use crate::usecase::shaper::{count_from_rows, shape_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub limits: RequestLimits,
    /// Requests allowed to hold a connection at once.
    pub max_in_flight: usize,
    /// How long a request waits for a free slot before failing.
    pub acquire_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            limits: RequestLimits::default(),
            max_in_flight: 4,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Trips the request's cancel flag when the awaiting future is dropped,
/// e.g. because the client disconnected.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub struct QueryService {
    source: Arc<dyn DataSource>,
    schema: TableSchema,
    settings: ServiceSettings,
    permits: Arc<Semaphore>,
}

impl QueryService {
    /// Describes the table once; every request is validated against this
    /// schema.
    pub fn new(source: Arc<dyn DataSource>, settings: ServiceSettings) -> Result<Self, SsrmError> {
        let schema = source.describe_table()?;
        info!(
            engine = source.engine(),
            table = source.table_name(),
            columns = schema.columns.len(),
            key = ?schema.key_columns,
            "described table"
        );
        Ok(Self {
            source,
            schema,
            permits: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            settings,
        })
    }

    pub fn engine(&self) -> &'static str {
        self.source.engine()
    }

    pub fn table_name(&self) -> &str {
        self.source.table_name()
    }

    fn compiler(&self) -> QueryCompiler<'_> {
        QueryCompiler::new(self.source.dialect(), &self.schema, self.source.table_name())
    }

    /// Validates and compiles without touching the engine.
    pub fn plan(&self, wire: SsrmRequest) -> Result<(DataRequest, QueryPlan), SsrmError> {
        let request = DataRequest::from_wire(wire, &self.schema, &self.settings.limits)?;
        let plan = self.compiler().compile(&request, self.source.exact_count());
        Ok((request, plan))
    }

    pub async fn query(&self, wire: SsrmRequest) -> Result<SsrmResponse, SsrmError> {
        let started = Instant::now();
        let group_keys = wire.group_keys.clone();
        let (request, plan) = self.plan(wire)?;
        debug!(sql = %plan.rows.sql, params = ?plan.rows.params, "compiled grid request");

        let mut results = self.run(plan.statements()).await?.into_iter();
        let row_count = match plan.count {
            Some(_) => results.next().and_then(|rows| count_from_rows(&rows)),
            None => None,
        };
        let rows = results.next().unwrap_or_default();
        let row_data = shape_rows(&plan.shape, &plan.kinds, rows);

        info!(
            level = request.level(),
            start_row = request.range.start,
            end_row = request.range.end,
            returned = row_data.len(),
            row_count = ?row_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "served grid request"
        );

        Ok(SsrmResponse {
            row_data,
            row_count,
            start_row: request.range.start,
            end_row: request.range.end,
            group_keys,
        })
    }

    pub async fn table_info(&self) -> Result<TableInfo, SsrmError> {
        let statement = self.compiler().table_count();
        let mut results = self.run(vec![statement]).await?;
        let total_rows = results
            .pop()
            .and_then(|rows| count_from_rows(&rows))
            .unwrap_or(0);

        Ok(TableInfo {
            table_name: self.source.table_name().to_string(),
            engine: self.source.engine().to_string(),
            total_rows,
            columns: self
                .schema
                .columns
                .iter()
                .map(|column| ColumnInfo {
                    column_name: column.name.clone(),
                    column_type: column.sql_type.clone(),
                    kind: column.kind,
                })
                .collect(),
        })
    }

    /// Runs statements on a blocking worker once a slot is free. Dropping
    /// the returned future cancels the statements.
    async fn run(&self, statements: Vec<Statement>) -> Result<Vec<Vec<Row>>, SsrmError> {
        let permit = timeout(self.settings.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                warn!(
                    waited_ms = self.settings.acquire_timeout.as_millis() as u64,
                    "no free query slot"
                );
                SsrmError::Unavailable("all query slots are busy".to_string())
            })?
            .map_err(|err| SsrmError::Unavailable(err.to_string()))?;

        let cancel = CancelFlag::new();
        let _guard = CancelOnDrop(cancel.clone());
        let source = self.source.clone();
        let results = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            source.execute_all(&statements, &cancel)
        })
        .await
        .map_err(|err| SsrmError::Query {
            operation: "query worker".to_string(),
            message: err.to_string(),
        })??;
        Ok(results)
    }
}
