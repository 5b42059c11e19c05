use crate::error::DashboardResult;
use crate::services::aggregator::TimeBucketAggregator;
use crate::services::pagination;
use crate::services::store::{AggregateFn, AggregationPipeline, BucketedPoint, SortOrder};
use crate::time::Granularity;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

/// A validated logs request.
#[derive(Debug, Clone, PartialEq)]
pub struct LogsQuery {
    pub site: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: Granularity,
    pub fields: Vec<String>,
    pub order: SortOrder,
    pub func: AggregateFn,
    /// Decoded page token, if the caller is resuming.
    pub token: Option<DateTime<Utc>>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogPage {
    pub results: Vec<BucketedPoint>,
    pub next_page_token: Option<String>,
}

impl LogsQuery {
    /// Ascending pages resume strictly after the token; descending pages end at it.
    pub fn pipeline(&self) -> AggregationPipeline {
        let (after, until) = match (self.order, self.token) {
            (SortOrder::Ascending, Some(token)) => (token, self.end),
            (SortOrder::Descending, Some(token)) => (self.start, token.min(self.end)),
            (_, None) => (self.start, self.end),
        };
        AggregationPipeline {
            site: self.site.clone(),
            after,
            until,
            granularity: self.granularity,
            fields: self.fields.clone(),
            func: self.func,
            order: self.order,
            limit: Some(self.limit),
        }
    }
}

/// Token for the page following `points`, or `None` when the page is empty.
///
/// The encoded instant is the last one covered by the final bucket (ascending) or the last
/// one before it (descending), so a resumed query never re-reads part of that bucket.
pub fn next_page_token(
    points: &[BucketedPoint],
    granularity: Granularity,
    order: SortOrder,
) -> Option<String> {
    let last = points.last()?;
    let boundary = match order {
        SortOrder::Ascending => granularity.advance(last.bucket_start, 1)?,
        SortOrder::Descending => last.bucket_start,
    } - Duration::microseconds(1);
    Some(pagination::encode(boundary))
}

pub async fn fetch_log_page(
    aggregator: &TimeBucketAggregator,
    query: &LogsQuery,
    cancel: &CancellationToken,
) -> DashboardResult<LogPage> {
    aggregator.ensure_site(&query.site).await?;
    let results = aggregator.query(&query.pipeline(), cancel).await?;
    let next_page_token = next_page_token(&results, query.granularity, query.order);
    Ok(LogPage {
        results,
        next_page_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minute_ramp_store, utc};
    use std::sync::Arc;

    fn query(order: SortOrder, limit: usize) -> LogsQuery {
        LogsQuery {
            site: "insead".to_string(),
            start: utc(2017, 1, 1, 0, 0),
            end: utc(2017, 1, 2, 0, 0),
            granularity: Granularity::Hours,
            fields: vec!["cwshdr".to_string()],
            order,
            func: AggregateFn::Avg,
            token: None,
            limit,
        }
    }

    fn aggregator() -> TimeBucketAggregator {
        TimeBucketAggregator::new(Arc::new(minute_ramp_store()))
    }

    #[tokio::test]
    async fn hourly_average_of_linear_ramp_hits_hour_midpoints() {
        let page = fetch_log_page(
            &aggregator(),
            &query(SortOrder::Ascending, 200),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(page.results.len(), 24);
        for (hour, point) in page.results.iter().enumerate() {
            assert_eq!(point.bucket_start, utc(2017, 1, 1, hour as u32, 0));
            let avg = point.value("cwshdr").unwrap();
            assert!((avg - (hour as f64 + 0.5)).abs() < 0.02, "hour {hour}: {avg}");
        }
    }

    #[tokio::test]
    async fn ascending_pages_cover_every_bucket_once() {
        let aggregator = aggregator();
        let cancel = CancellationToken::new();
        let mut request = query(SortOrder::Ascending, 10);
        let mut seen = Vec::new();
        let mut page_sizes = Vec::new();
        loop {
            let page = fetch_log_page(&aggregator, &request, &cancel).await.unwrap();
            if page.results.is_empty() {
                assert!(page.next_page_token.is_none());
                break;
            }
            page_sizes.push(page.results.len());
            seen.extend(page.results.iter().map(|p| p.bucket_start));
            let token = page.next_page_token.expect("token for non-empty page");
            request.token = Some(pagination::decode(&token).unwrap());
        }
        assert_eq!(page_sizes, vec![10, 10, 4]);
        let expected: Vec<_> = (0..24).map(|h| utc(2017, 1, 1, h, 0)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn descending_pages_walk_backwards() {
        let aggregator = aggregator();
        let cancel = CancellationToken::new();
        let mut request = query(SortOrder::Descending, 10);
        let mut seen = Vec::new();
        for _ in 0..5 {
            let page = fetch_log_page(&aggregator, &request, &cancel).await.unwrap();
            if page.results.is_empty() {
                break;
            }
            seen.extend(page.results.iter().map(|p| p.bucket_start));
            let token = page.next_page_token.unwrap();
            request.token = Some(pagination::decode(&token).unwrap());
        }
        let expected: Vec<_> = (0..24).rev().map(|h| utc(2017, 1, 1, h, 0)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn token_supersedes_start_for_ascending_queries() {
        let mut request = query(SortOrder::Ascending, 5);
        let token = utc(2017, 1, 1, 6, 0);
        request.token = Some(token);
        let pipeline = request.pipeline();
        assert_eq!(pipeline.after, token);
        assert_eq!(pipeline.until, request.end);
        assert_eq!(pipeline.limit, Some(5));
    }

    #[test]
    fn no_token_for_empty_page() {
        assert_eq!(
            next_page_token(&[], Granularity::Hours, SortOrder::Ascending),
            None
        );
    }

    #[test]
    fn token_marks_last_instant_of_final_bucket() {
        let point = BucketedPoint {
            bucket_start: utc(2017, 1, 1, 9, 0),
            values: Default::default(),
        };
        assert_eq!(
            next_page_token(
                std::slice::from_ref(&point),
                Granularity::Hours,
                SortOrder::Ascending
            )
            .as_deref(),
            Some("20170101095959999999")
        );
        assert_eq!(
            next_page_token(&[point], Granularity::Hours, SortOrder::Descending).as_deref(),
            Some("20170101085959999999")
        );
    }
}
