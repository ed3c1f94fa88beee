//! Read-side projections backing the HTTP API.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{PumpkinError, PumpkinResult};
use crate::har;
use crate::models::{
    DailyAverage, FailedRequest, LatestRunSummary, RunSummary, UrlTestDetail, UrlTestSummary,
};
use crate::repository::{RunRepository, UrlTestRepository};

/// Hard ceiling for caller-supplied limits.
const MAX_LIMIT: i64 = 1000;

/// Read-only query facade over the repositories.
#[derive(Clone)]
pub struct QueryService {
    runs: RunRepository,
    tests: UrlTestRepository,
}

impl QueryService {
    pub fn new(runs: RunRepository, tests: UrlTestRepository) -> Self {
        Self { runs, tests }
    }

    pub async fn get_latest_run(&self) -> PumpkinResult<LatestRunSummary> {
        let (run, avg_load, avg_ttfb) = self
            .runs
            .latest_with_averages()
            .await?
            .ok_or_else(|| PumpkinError::NotFound("no runs recorded yet".into()))?;
        Ok(LatestRunSummary {
            run: run.into(),
            avg_total_page_load_ms: avg_load,
            avg_time_to_first_byte_ms: avg_ttfb,
        })
    }

    pub async fn list_runs(&self, limit: i64) -> PumpkinResult<Vec<RunSummary>> {
        let limit = check_limit(limit)?;
        let runs = self.runs.list(limit).await?;
        Ok(runs.into_iter().map(Into::into).collect())
    }

    pub async fn get_run(&self, id: i64) -> PumpkinResult<RunSummary> {
        let run = self
            .runs
            .get(id)
            .await?
            .ok_or_else(|| PumpkinError::NotFound(format!("run {id}")))?;
        Ok(run.into())
    }

    pub async fn list_url_tests_for_run(&self, id: i64) -> PumpkinResult<Vec<UrlTestSummary>> {
        self.get_run(id).await?;
        self.tests.list_for_run(id).await
    }

    pub async fn get_url_test(&self, id: i64) -> PumpkinResult<UrlTestDetail> {
        self.tests
            .get_detail(id)
            .await?
            .ok_or_else(|| PumpkinError::NotFound(format!("url test {id}")))
    }

    /// Failed requests for one test, derived from its stored HAR:
    /// ascending status code, capture order within one code.
    pub async fn get_failed_requests_for_test(&self, id: i64) -> PumpkinResult<Vec<FailedRequest>> {
        let har_path = self
            .tests
            .get_har_path(id)
            .await?
            .ok_or_else(|| PumpkinError::NotFound(format!("url test {id}")))?;
        Ok(har::analyze_file(Path::new(&har_path)).failed_requests)
    }

    pub async fn list_slowest_in_latest(&self, limit: i64) -> PumpkinResult<Vec<UrlTestSummary>> {
        let limit = check_limit(limit)?;
        self.tests.ranked_in_latest(limit, true).await
    }

    pub async fn list_fastest_in_latest(&self, limit: i64) -> PumpkinResult<Vec<UrlTestSummary>> {
        let limit = check_limit(limit)?;
        self.tests.ranked_in_latest(limit, false).await
    }

    pub async fn domain_trend(&self, host: &str, limit: i64) -> PumpkinResult<Vec<UrlTestSummary>> {
        let limit = check_limit(limit)?;
        self.tests.domain_trend(host, limit).await
    }

    pub async fn url_autocomplete(&self, prefix: &str, limit: i64) -> PumpkinResult<Vec<String>> {
        let limit = check_limit(limit)?;
        self.tests.autocomplete_domains(prefix, limit).await
    }

    pub async fn tests_for_url(&self, host: &str, limit: i64) -> PumpkinResult<Vec<UrlTestSummary>> {
        let limit = check_limit(limit)?;
        self.tests.list_for_domain(host, limit).await
    }

    pub async fn list_tests_with_errors(&self, limit: i64) -> PumpkinResult<Vec<UrlTestSummary>> {
        let limit = check_limit(limit)?;
        self.tests.list_with_errors(limit).await
    }

    /// Average load time per calendar day in the requested zone, covering
    /// the last `days` days ending today. Days without data yield a zero
    /// row so the series has no gaps.
    pub async fn daily_average_load_time(
        &self,
        host: &str,
        days: i64,
        tz_name: &str,
    ) -> PumpkinResult<Vec<DailyAverage>> {
        let tz = validate_timezone(tz_name)?;
        if !(1..=366).contains(&days) {
            return Err(PumpkinError::BadRequest(format!(
                "days must be between 1 and 366, got {days}"
            )));
        }

        let today = Utc::now().with_timezone(&tz).date_naive();
        let first_day = today - Duration::days(days - 1);
        let window_start = tz
            .from_local_datetime(&first_day.and_hms_opt(0, 0, 0).expect("midnight exists"))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() - Duration::days(days));

        let rows = self.tests.load_times_since(host, window_start).await?;
        let mut buckets: BTreeMap<NaiveDate, (f64, i64)> = BTreeMap::new();
        for (ts, load) in rows {
            let Some(load) = load else { continue };
            let day = ts.with_timezone(&tz).date_naive();
            let bucket = buckets.entry(day).or_insert((0.0, 0));
            bucket.0 += load;
            bucket.1 += 1;
        }

        let mut series = Vec::with_capacity(days as usize);
        let mut day = first_day;
        while day <= today {
            let (sum, count) = buckets.get(&day).copied().unwrap_or((0.0, 0));
            series.push(DailyAverage {
                date: day,
                avg_load_time_ms: if count > 0 { sum / count as f64 } else { 0.0 },
                test_count: count,
            });
            day = day.succ_opt().expect("date range is bounded");
        }
        Ok(series)
    }

    pub async fn available_dates(&self) -> PumpkinResult<Vec<NaiveDate>> {
        self.runs.available_dates().await
    }

    pub async fn runs_by_date(&self, date: &str) -> PumpkinResult<Vec<RunSummary>> {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| PumpkinError::BadRequest(format!("date must be YYYY-MM-DD, got {date}")))?;
        let runs = self.runs.list_by_date(date).await?;
        Ok(runs.into_iter().map(Into::into).collect())
    }
}

fn check_limit(limit: i64) -> PumpkinResult<i64> {
    if limit < 1 {
        return Err(PumpkinError::BadRequest(format!(
            "limit must be positive, got {limit}"
        )));
    }
    Ok(limit.min(MAX_LIMIT))
}

/// Accept `UTC` or an IANA `Area/Location` name made of letters and
/// underscores, then resolve it against the tz database.
pub fn validate_timezone(name: &str) -> PumpkinResult<Tz> {
    if name == "UTC" {
        return Ok(chrono_tz::UTC);
    }
    let shape_ok = match name.split_once('/') {
        Some((area, location)) => {
            let part_ok =
                |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic() || c == '_');
            part_ok(area) && part_ok(location)
        }
        None => false,
    };
    if !shape_ok {
        return Err(PumpkinError::BadRequest(format!("invalid timezone: {name}")));
    }
    name.parse::<Tz>()
        .map_err(|_| PumpkinError::BadRequest(format!("unknown timezone: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezone_accepts_utc_and_iana_names() {
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("America/New_York").is_ok());
        assert!(validate_timezone("Europe/Berlin").is_ok());
    }

    #[test]
    fn timezone_rejects_bad_shapes() {
        for bad in [
            "utc",
            "America",
            "America/",
            "/New_York",
            "America/New York",
            "America/New-York",
            "America/Argentina/Buenos_Aires",
            "../../etc/passwd",
            "",
        ] {
            assert!(validate_timezone(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn timezone_rejects_well_shaped_unknown_zone() {
        assert!(validate_timezone("Atlantis/Central").is_err());
    }

    #[test]
    fn limits_are_checked() {
        assert!(check_limit(0).is_err());
        assert!(check_limit(-3).is_err());
        assert_eq!(check_limit(10).unwrap(), 10);
        assert_eq!(check_limit(10_000).unwrap(), MAX_LIMIT);
    }
}
