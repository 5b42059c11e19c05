use crate::error::{DashboardError, DashboardResult};
use crate::services::store::{AggregationPipeline, BucketedPoint, LogStore};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runs time-bucketed aggregation queries against the log store.
#[derive(Clone)]
pub struct TimeBucketAggregator {
    store: Arc<dyn LogStore>,
}

impl TimeBucketAggregator {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Executes `pipeline` over `(after, until]`.
    ///
    /// An empty or inverted window yields no rows rather than an error. When `cancel` fires
    /// first the store future is dropped, releasing whatever the query held.
    pub async fn query(
        &self,
        pipeline: &AggregationPipeline,
        cancel: &CancellationToken,
    ) -> DashboardResult<Vec<BucketedPoint>> {
        if pipeline.after >= pipeline.until {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DashboardError::Cancelled),
            rows = self.store.aggregate(pipeline) => rows?,
        };
        tracing::debug!(
            site = %pipeline.site,
            granularity = %pipeline.granularity,
            func = %pipeline.func,
            fields = pipeline.fields.len(),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bucket query finished"
        );
        Ok(rows)
    }

    pub async fn ensure_site(&self, site: &str) -> DashboardResult<()> {
        if self.store.site_exists(site).await? {
            Ok(())
        } else {
            Err(DashboardError::UnknownSite(site.to_string()))
        }
    }
}
