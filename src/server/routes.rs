//! Route table.

use axum::routing::get;
use axum::Router;

use super::{handlers, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/runs", get(handlers::list_runs))
        .route("/api/runs/latest", get(handlers::get_latest_run))
        .route("/api/runs/:id", get(handlers::get_run))
        .route("/api/runs/:id/tests", get(handlers::list_run_tests))
        .route("/api/tests/:id", get(handlers::get_test))
        .route(
            "/api/tests/:id/failed-requests",
            get(handlers::get_test_failed_requests),
        )
        .route("/api/stats/latest", get(handlers::stats_latest))
        .route("/api/stats/slowest", get(handlers::stats_slowest))
        .route("/api/stats/fastest", get(handlers::stats_fastest))
        .route("/api/stats/errors", get(handlers::stats_errors))
        .route(
            "/api/calendar/available-dates",
            get(handlers::calendar_available_dates),
        )
        .route(
            "/api/calendar/runs-by-date",
            get(handlers::calendar_runs_by_date),
        )
        .route("/api/urls/autocomplete", get(handlers::urls_autocomplete))
        .route("/api/urls/:host/tests", get(handlers::url_tests))
        .route(
            "/api/urls/:host/daily-averages",
            get(handlers::url_daily_averages),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
}
