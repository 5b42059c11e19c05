//! Query-string validation shared by the log and analytics endpoints.
//!
//! Every parser returns either a validated query or the full list of rejected fields.

use crate::error::FieldError;
use crate::services::abnormality::AnalysisQuery;
use crate::services::logs::LogsQuery;
use crate::services::pagination;
use crate::services::store::{AggregateFn, SortOrder};
use crate::time::{parse_flexible_datetime, start_of_day, Granularity};
use chrono::{DateTime, Duration, Utc};
use url::form_urlencoded;

pub const DEFAULT_RANGE_DAYS: i64 = 2;
const MAX_FIELD_NAME_LEN: usize = 64;

/// Decoded query pairs; the first non-empty occurrence of a key wins.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(raw: Option<&str>) -> Self {
        let pairs = raw
            .map(|raw| form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.trim())
            .find(|v| !v.is_empty())
    }
}

pub fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FIELD_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_range(
    params: &QueryParams,
    now: DateTime<Utc>,
    errors: &mut Vec<FieldError>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let end = match params.get("end") {
        None => Some(start_of_day(now)),
        Some(raw) => {
            let parsed = parse_flexible_datetime(raw);
            if parsed.is_none() {
                errors.push(FieldError::new("end", format!("end {raw} is invalid")));
            }
            parsed
        }
    };
    let start = match params.get("start") {
        None => end.map(|end| end - Duration::days(DEFAULT_RANGE_DAYS)),
        Some(raw) => {
            let parsed = parse_flexible_datetime(raw);
            if parsed.is_none() {
                errors.push(FieldError::new("start", format!("start {raw} is invalid")));
            }
            parsed
        }
    };
    let (start, end) = (start?, end?);
    if start >= end {
        errors.push(FieldError::new("start", "start must be before end"));
        return None;
    }
    Some((start, end))
}

fn parse_granularity(params: &QueryParams, errors: &mut Vec<FieldError>) -> Option<Granularity> {
    match params.get("freq") {
        None => Some(Granularity::Hours),
        Some(raw) => raw
            .parse::<Granularity>()
            .map_err(|message| errors.push(FieldError::new("freq", format!("freq {message}"))))
            .ok(),
    }
}

fn parse_field_list(params: &QueryParams, errors: &mut Vec<FieldError>) -> Vec<String> {
    let Some(raw) = params.get("fields") else {
        return Vec::new();
    };
    let mut fields: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        if !is_valid_field_name(name) {
            errors.push(FieldError::new("fields", format!("field {name} is invalid")));
        } else if !fields.iter().any(|existing| existing == name) {
            fields.push(name.to_string());
        }
    }
    fields
}

fn parse_single_field(params: &QueryParams, errors: &mut Vec<FieldError>) -> Option<String> {
    match params.get("field") {
        None => {
            errors.push(FieldError::new("field", "field is required"));
            None
        }
        Some(name) if !is_valid_field_name(name) => {
            errors.push(FieldError::new("field", format!("field {name} is invalid")));
            None
        }
        Some(name) => Some(name.to_string()),
    }
}

fn parse_order(params: &QueryParams, errors: &mut Vec<FieldError>) -> Option<SortOrder> {
    let Some(raw) = params.get("order") else {
        return Some(SortOrder::Ascending);
    };
    let order = raw.parse::<i64>().ok().and_then(SortOrder::from_sign);
    if order.is_none() {
        errors.push(FieldError::new(
            "order",
            "order 1 or ascending, -1 for descending",
        ));
    }
    order
}

fn parse_func(params: &QueryParams, errors: &mut Vec<FieldError>) -> Option<AggregateFn> {
    match params.get("func") {
        None => Some(AggregateFn::Avg),
        Some(raw) => raw
            .parse::<AggregateFn>()
            .map_err(|message| errors.push(FieldError::new("func", message)))
            .ok(),
    }
}

fn parse_token(params: &QueryParams, errors: &mut Vec<FieldError>) -> Option<DateTime<Utc>> {
    let raw = params.get("token")?;
    pagination::decode(raw)
        .map_err(|err| errors.push(FieldError::new("token", err.to_string())))
        .ok()
}

/// `limit` (or its older name `count`), clamped to `1..=max_limit`.
fn parse_limit(params: &QueryParams, max_limit: usize, errors: &mut Vec<FieldError>) -> usize {
    let Some((key, raw)) = ["limit", "count"]
        .into_iter()
        .find_map(|key| params.get(key).map(|raw| (key, raw)))
    else {
        return max_limit;
    };
    match raw.parse::<i64>() {
        Ok(value) => usize::try_from(value.max(1)).unwrap_or(max_limit).min(max_limit),
        Err(_) => {
            errors.push(FieldError::new(key, format!("{key} {raw} is not an integer")));
            max_limit
        }
    }
}

pub fn parse_logs_query(
    site: &str,
    params: &QueryParams,
    now: DateTime<Utc>,
    max_limit: usize,
) -> Result<LogsQuery, Vec<FieldError>> {
    let mut errors = Vec::new();
    let range = parse_range(params, now, &mut errors);
    let granularity = parse_granularity(params, &mut errors);
    let fields = parse_field_list(params, &mut errors);
    let order = parse_order(params, &mut errors);
    let func = parse_func(params, &mut errors);
    let token = parse_token(params, &mut errors);
    let limit = parse_limit(params, max_limit, &mut errors);

    match (range, granularity, order, func) {
        (Some((start, end)), Some(granularity), Some(order), Some(func)) if errors.is_empty() => {
            Ok(LogsQuery {
                site: site.to_string(),
                start,
                end,
                granularity,
                fields,
                order,
                func,
                token,
                limit,
            })
        }
        _ => Err(errors),
    }
}

fn parse_analysis_query(
    site: &str,
    params: &QueryParams,
    now: DateTime<Utc>,
) -> Result<AnalysisQuery, Vec<FieldError>> {
    let mut errors = Vec::new();
    let field = parse_single_field(params, &mut errors);
    let range = parse_range(params, now, &mut errors);
    let granularity = parse_granularity(params, &mut errors);

    match (field, range, granularity) {
        (Some(field), Some((start, end)), Some(granularity)) if errors.is_empty() => {
            Ok(AnalysisQuery {
                site: site.to_string(),
                field,
                start,
                end,
                granularity,
            })
        }
        _ => Err(errors),
    }
}

pub fn parse_abnormality_query(
    site: &str,
    params: &QueryParams,
    now: DateTime<Utc>,
) -> Result<AnalysisQuery, Vec<FieldError>> {
    parse_analysis_query(site, params, now)
}

pub fn parse_forecast_query(
    site: &str,
    params: &QueryParams,
    now: DateTime<Utc>,
) -> Result<AnalysisQuery, Vec<FieldError>> {
    parse_analysis_query(site, params, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::utc;

    fn params(raw: &str) -> QueryParams {
        QueryParams::parse(Some(raw))
    }

    fn now() -> DateTime<Utc> {
        utc(2017, 1, 3, 9, 30)
    }

    #[test]
    fn defaults_cover_two_days_before_midnight() {
        let query = parse_logs_query("insead", &QueryParams::default(), now(), 200).unwrap();
        assert_eq!(query.end, utc(2017, 1, 3, 0, 0));
        assert_eq!(query.start, utc(2017, 1, 1, 0, 0));
        assert_eq!(query.granularity, Granularity::Hours);
        assert_eq!(query.order, SortOrder::Ascending);
        assert_eq!(query.func, AggregateFn::Avg);
        assert_eq!(query.limit, 200);
        assert!(query.fields.is_empty());
        assert!(query.token.is_none());
    }

    #[test]
    fn parses_every_parameter() {
        let query = parse_logs_query(
            "insead",
            &params(
                "start=2017-01-01&end=2017-01-02T06:00:00&freq=minutes&fields=cwshdr,%20cwrhdr,&order=-1&func=max&token=20170101055959999999&limit=50",
            ),
            now(),
            200,
        )
        .unwrap();
        assert_eq!(query.end, utc(2017, 1, 2, 6, 0));
        assert_eq!(query.granularity, Granularity::Minutes);
        assert_eq!(query.fields, vec!["cwshdr", "cwrhdr"]);
        assert_eq!(query.order, SortOrder::Descending);
        assert_eq!(query.func, AggregateFn::Max);
        assert_eq!(
            query.token,
            Some(utc(2017, 1, 1, 5, 59) + Duration::microseconds(59_999_999))
        );
        assert_eq!(query.limit, 50);
    }

    #[test]
    fn reports_every_invalid_field() {
        let errors = parse_logs_query(
            "insead",
            &params("freq=weeks&order=2&func=median&token=abc&fields=cw;drop&limit=x"),
            now(),
            200,
        )
        .unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|err| err.field.as_str()).collect();
        assert_eq!(fields, vec!["freq", "fields", "order", "func", "token", "limit"]);
        assert!(errors[0].message.contains("Allowed: years, months, days, hours, minutes"));
    }

    #[test]
    fn start_after_end_is_rejected() {
        let errors = parse_logs_query(
            "insead",
            &params("start=2017-01-02&end=2017-01-01"),
            now(),
            200,
        )
        .unwrap_err();
        assert_eq!(errors, vec![FieldError::new("start", "start must be before end")]);
    }

    #[test]
    fn limit_is_clamped_and_count_is_an_alias() {
        let parse = |raw: &str| parse_logs_query("insead", &params(raw), now(), 200).unwrap().limit;
        assert_eq!(parse("limit=5000"), 200);
        assert_eq!(parse("limit=0"), 1);
        assert_eq!(parse("limit=-3"), 1);
        assert_eq!(parse("count=25"), 25);
        assert_eq!(parse("limit=10&count=25"), 10);
    }

    #[test]
    fn first_non_empty_value_wins() {
        let p = params("freq=&freq=days&freq=hours");
        assert_eq!(p.get("freq"), Some("days"));
    }

    #[test]
    fn analysis_queries_require_a_single_field() {
        let errors = parse_abnormality_query("insead", &QueryParams::default(), now()).unwrap_err();
        assert_eq!(errors, vec![FieldError::new("field", "field is required")]);

        let query = parse_forecast_query("insead", &params("field=cwshdr&freq=days"), now()).unwrap();
        assert_eq!(query.field, "cwshdr");
        assert_eq!(query.granularity, Granularity::Days);
        assert_eq!(query.start, utc(2017, 1, 1, 0, 0));
    }
}
