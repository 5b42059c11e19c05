use super::{AggregationPipeline, BucketedPoint, LogRecord, LogStore, SortOrder, StoreError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{BTreeMap, HashSet};

/// Evaluates aggregation pipelines over an in-process record set.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogStore {
    sites: HashSet<String>,
    records: Vec<LogRecord>,
}

impl InMemoryLogStore {
    pub fn new<I, S>(sites: I, records: Vec<LogRecord>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sites: sites.into_iter().map(Into::into).collect(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn evaluate(&self, pipeline: &AggregationPipeline) -> Vec<BucketedPoint> {
        let mut buckets: BTreeMap<DateTime<Utc>, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
        for record in &self.records {
            if record.site != pipeline.site
                || record.timestamp <= pipeline.after
                || record.timestamp > pipeline.until
            {
                continue;
            }
            let bucket = buckets
                .entry(pipeline.granularity.truncate(record.timestamp))
                .or_default();
            for field in &pipeline.fields {
                let values = bucket.entry(field.as_str()).or_default();
                if let Some(value) = record.fields.get(field) {
                    values.push(*value);
                }
            }
        }

        let mut points: Vec<BucketedPoint> = buckets
            .into_iter()
            .map(|(bucket_start, grouped)| BucketedPoint {
                bucket_start,
                values: grouped
                    .into_iter()
                    .map(|(field, values)| (field.to_string(), pipeline.func.apply(&values)))
                    .collect(),
            })
            .collect();

        if pipeline.order == SortOrder::Descending {
            points.reverse();
        }
        if let Some(limit) = pipeline.limit {
            points.truncate(limit);
        }
        points
    }
}

impl LogStore for InMemoryLogStore {
    fn aggregate<'a>(
        &'a self,
        pipeline: &'a AggregationPipeline,
    ) -> BoxFuture<'a, Result<Vec<BucketedPoint>, StoreError>> {
        async move { Ok(self.evaluate(pipeline)) }.boxed()
    }

    fn site_exists<'a>(&'a self, site: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        async move { Ok(self.sites.contains(site)) }.boxed()
    }
}
