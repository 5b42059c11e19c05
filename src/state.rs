use crate::config::DashboardConfig;
use crate::services::aggregator::TimeBucketAggregator;
use crate::services::forecast::{ForecastRegistry, ModelCache};
use crate::services::store::LogStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub config: DashboardConfig,
    pub store: Arc<dyn LogStore>,
    pub aggregator: TimeBucketAggregator,
    pub models: Arc<ModelCache>,
    pub registry: Arc<ForecastRegistry>,
    /// Cancelled at shutdown; requests race child tokens against it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: DashboardConfig,
        store: Arc<dyn LogStore>,
        registry: ForecastRegistry,
        models: ModelCache,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            aggregator: TimeBucketAggregator::new(store.clone()),
            store,
            models: Arc::new(models),
            registry: Arc::new(registry),
            shutdown,
        }
    }
}

