//! Endpoint handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;
use crate::error::PumpkinError;
use crate::models::{UrlTestDetail, UrlTestSummary};
use crate::repository::ping;

const DEFAULT_RUN_LIMIT: i64 = 20;
const DEFAULT_RANK_LIMIT: i64 = 10;
const DEFAULT_TEST_LIMIT: i64 = 50;
const DEFAULT_TREND_DAYS: i64 = 30;

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Error half of the envelope, carrying the mapped status code.
pub struct ApiFailure {
    status: StatusCode,
    message: String,
}

impl From<PumpkinError> for ApiFailure {
    fn from(err: PumpkinError) -> Self {
        let status = match err {
            PumpkinError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PumpkinError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Internal detail stays in the logs, not in the client payload.
        let message = match &err {
            PumpkinError::BadRequest(m) => m.clone(),
            PumpkinError::NotFound(m) => format!("not found: {m}"),
            other => {
                tracing::error!(error = %other, "request failed");
                "internal error".to_string()
            }
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let body = json!({ "success": false, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiFailure>;

/// Stored artifact paths are absolute container paths; the dashboard
/// reaches them relative to the web root.
fn web_path(path: &str) -> String {
    path.strip_prefix("/app").unwrap_or(path).to_string()
}

fn summary_web_paths(mut test: UrlTestSummary) -> UrlTestSummary {
    test.screenshot_path = web_path(&test.screenshot_path);
    test.har_path = web_path(&test.har_path);
    test
}

fn detail_web_paths(mut test: UrlTestDetail) -> UrlTestDetail {
    test.screenshot_path = web_path(&test.screenshot_path);
    test.har_path = web_path(&test.har_path);
    test
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AutocompleteQuery {
    q: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DailyAveragesQuery {
    days: Option<i64>,
    timezone: Option<String>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> ApiResult<Vec<crate::models::RunSummary>> {
    let runs = state
        .queries
        .list_runs(params.limit.unwrap_or(DEFAULT_RUN_LIMIT))
        .await?;
    Ok(ApiResponse::ok(runs))
}

pub async fn get_latest_run(
    State(state): State<AppState>,
) -> ApiResult<crate::models::LatestRunSummary> {
    Ok(ApiResponse::ok(state.queries.get_latest_run().await?))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<crate::models::RunSummary> {
    Ok(ApiResponse::ok(state.queries.get_run(id).await?))
}

pub async fn list_run_tests(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<UrlTestSummary>> {
    let tests = state.queries.list_url_tests_for_run(id).await?;
    Ok(ApiResponse::ok(
        tests.into_iter().map(summary_web_paths).collect(),
    ))
}

pub async fn get_test(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<UrlTestDetail> {
    let test = state.queries.get_url_test(id).await?;
    Ok(ApiResponse::ok(detail_web_paths(test)))
}

pub async fn get_test_failed_requests(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<crate::models::FailedRequest>> {
    Ok(ApiResponse::ok(
        state.queries.get_failed_requests_for_test(id).await?,
    ))
}

pub async fn stats_latest(
    State(state): State<AppState>,
) -> ApiResult<crate::models::LatestRunSummary> {
    Ok(ApiResponse::ok(state.queries.get_latest_run().await?))
}

pub async fn stats_slowest(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> ApiResult<Vec<UrlTestSummary>> {
    let tests = state
        .queries
        .list_slowest_in_latest(params.limit.unwrap_or(DEFAULT_RANK_LIMIT))
        .await?;
    Ok(ApiResponse::ok(
        tests.into_iter().map(summary_web_paths).collect(),
    ))
}

pub async fn stats_fastest(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> ApiResult<Vec<UrlTestSummary>> {
    let tests = state
        .queries
        .list_fastest_in_latest(params.limit.unwrap_or(DEFAULT_RANK_LIMIT))
        .await?;
    Ok(ApiResponse::ok(
        tests.into_iter().map(summary_web_paths).collect(),
    ))
}

pub async fn stats_errors(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> ApiResult<Vec<UrlTestSummary>> {
    let tests = state
        .queries
        .list_tests_with_errors(params.limit.unwrap_or(DEFAULT_TEST_LIMIT))
        .await?;
    Ok(ApiResponse::ok(
        tests.into_iter().map(summary_web_paths).collect(),
    ))
}

pub async fn calendar_available_dates(
    State(state): State<AppState>,
) -> ApiResult<Vec<chrono::NaiveDate>> {
    Ok(ApiResponse::ok(state.queries.available_dates().await?))
}

pub async fn calendar_runs_by_date(
    State(state): State<AppState>,
    Query(params): Query<DateQuery>,
) -> ApiResult<Vec<crate::models::RunSummary>> {
    let date = params
        .date
        .ok_or_else(|| PumpkinError::BadRequest("date parameter is required".into()))?;
    Ok(ApiResponse::ok(state.queries.runs_by_date(&date).await?))
}

pub async fn urls_autocomplete(
    State(state): State<AppState>,
    Query(params): Query<AutocompleteQuery>,
) -> ApiResult<Vec<String>> {
    let prefix = params.q.unwrap_or_default();
    let hosts = state
        .queries
        .url_autocomplete(&prefix, params.limit.unwrap_or(DEFAULT_RANK_LIMIT))
        .await?;
    Ok(ApiResponse::ok(hosts))
}

pub async fn url_tests(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Query(params): Query<LimitQuery>,
) -> ApiResult<Vec<UrlTestSummary>> {
    let tests = state
        .queries
        .tests_for_url(&host, params.limit.unwrap_or(DEFAULT_TEST_LIMIT))
        .await?;
    Ok(ApiResponse::ok(
        tests.into_iter().map(summary_web_paths).collect(),
    ))
}

pub async fn url_daily_averages(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Query(params): Query<DailyAveragesQuery>,
) -> ApiResult<Vec<crate::models::DailyAverage>> {
    let days = params.days.unwrap_or(DEFAULT_TREND_DAYS);
    let timezone = params.timezone.unwrap_or_else(|| "UTC".to_string());
    Ok(ApiResponse::ok(
        state
            .queries
            .daily_average_load_time(&host, days, &timezone)
            .await?,
    ))
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = match ping(&state.pool).await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };
    let status = if database == "connected" { "ok" } else { "degraded" };
    Json(json!({ "status": status, "database": database }))
}
