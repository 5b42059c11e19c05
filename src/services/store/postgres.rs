use super::{AggregationPipeline, BucketedPoint, LogStore, StoreError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;

/// `sensor_logs(site, ts, fields jsonb)` backed store; see `migrations/0001_sensor_logs.sql`.
#[derive(Clone)]
pub struct PgLogStore {
    pool: PgPool,
}

impl PgLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_aggregate(
        &self,
        pipeline: &AggregationPipeline,
    ) -> Result<Vec<BucketedPoint>, StoreError> {
        let mut qb = build_aggregate_query(pipeline);
        let rows: Vec<PgRow> = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| decode_bucket_row(row, &pipeline.fields))
            .collect()
    }
}

pub(crate) fn build_aggregate_query(pipeline: &AggregationPipeline) -> QueryBuilder<'_, Postgres> {
    // Truncate in UTC regardless of the session time zone.
    let mut qb = QueryBuilder::<Postgres>::new("SELECT date_trunc(");
    qb.push_bind(pipeline.granularity.date_trunc_unit())
        .push(", ts AT TIME ZONE 'UTC') AT TIME ZONE 'UTC' AS bucket");
    for (idx, field) in pipeline.fields.iter().enumerate() {
        qb.push(", ")
            .push(pipeline.func.as_str())
            .push("((fields->>")
            .push_bind(field.as_str())
            .push(format!(")::float8) AS v{idx}"));
    }
    qb.push(" FROM sensor_logs WHERE site = ")
        .push_bind(pipeline.site.as_str())
        .push(" AND ts > ")
        .push_bind(pipeline.after)
        .push(" AND ts <= ")
        .push_bind(pipeline.until)
        .push(" GROUP BY bucket ORDER BY bucket ")
        .push(pipeline.order.sql_keyword());
    if let Some(limit) = pipeline.limit {
        qb.push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    qb
}

fn decode_bucket_row(row: &PgRow, fields: &[String]) -> Result<BucketedPoint, StoreError> {
    let bucket_start: DateTime<Utc> = row
        .try_get("bucket")
        .map_err(|err| StoreError::MalformedRow(err.to_string()))?;
    let mut values = BTreeMap::new();
    for (idx, field) in fields.iter().enumerate() {
        let value: Option<f64> = row
            .try_get(idx + 1)
            .map_err(|err| StoreError::MalformedRow(format!("{field}: {err}")))?;
        values.insert(field.clone(), value);
    }
    Ok(BucketedPoint {
        bucket_start,
        values,
    })
}

impl LogStore for PgLogStore {
    fn aggregate<'a>(
        &'a self,
        pipeline: &'a AggregationPipeline,
    ) -> BoxFuture<'a, Result<Vec<BucketedPoint>, StoreError>> {
        self.run_aggregate(pipeline).boxed()
    }

    fn site_exists<'a>(&'a self, site: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        async move {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sites WHERE site_id = $1)")
                    .bind(site)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(exists)
        }
        .boxed()
    }
}
