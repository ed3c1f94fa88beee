//! HTTP surface: envelope shape, status mapping, and path translation.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use pumpkin::artifacts::ArtifactStore;
use pumpkin::coordinator::{RunCoordinator, RunOutcome};
use pumpkin::ingest::Ingestor;
use pumpkin::models::{TestMeasurement, TestStatus};
use pumpkin::repository::migrations::run_migrations;
use pumpkin::repository::{create_pool, RunRepository, UrlTestRepository};
use pumpkin::server::{create_router, AppState};

struct Harness {
    router: axum::Router,
    coordinator: RunCoordinator,
    ingestor: Ingestor,
    store: ArtifactStore,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_pool(&dir.path().join("pumpkin.db").display().to_string());
    run_migrations(&pool).await.unwrap();
    let runs = RunRepository::new(pool.clone());
    let tests = UrlTestRepository::new(pool.clone());
    Harness {
        router: create_router(AppState::new(pool)),
        coordinator: RunCoordinator::new(runs),
        ingestor: Ingestor::new(tests),
        // Container layout: artifacts under /app/test-history. The tempdir
        // stands in for /app.
        store: ArtifactStore::new(dir.path().join("app").join("test-history")),
        _dir: dir,
    }
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

async fn seed_passed_test(h: &Harness, url: &str) -> (i64, i64) {
    let (run_id, _) = h.coordinator.create_run(1, 1, None).await.unwrap();
    let plan = h.store.allocate_test_dir(url, Utc::now()).unwrap();
    std::fs::write(&plan.screenshot_path, b"\x89PNG").unwrap();
    std::fs::write(
        &plan.har_path,
        br#"{"log":{"entries":[
            {"request":{"method":"GET","url":"https://x/ok"},"response":{"status":200}},
            {"request":{"method":"GET","url":"https://x/gone"},"response":{"status":404}}
        ]}}"#,
    )
    .unwrap();
    let mut m = TestMeasurement::synthetic(
        url,
        "stub",
        TestStatus::Passed,
        None,
        Utc::now(),
        5,
        plan.screenshot_path,
        plan.har_path,
    );
    m.timing.total_page_load_ms = Some(321.0);
    let (test_id, _) = h.ingestor.ingest(run_id, m).await.unwrap();
    h.coordinator
        .finalize_run(run_id, 10, RunOutcome::AllPassed)
        .await
        .unwrap();
    (run_id, test_id)
}

#[tokio::test]
async fn health_reports_connected_database() {
    let h = harness().await;
    let (status, body) = get(&h.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
}

#[tokio::test]
async fn latest_run_is_404_when_nothing_ran() {
    let h = harness().await;
    let (status, body) = get(&h.router, "/api/runs/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn run_listing_uses_the_envelope() {
    let h = harness().await;
    seed_passed_test(&h, "https://example.com").await;

    let (status, body) = get(&h.router, "/api/runs?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let runs = body["data"].as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], "COMPLETED");
    assert_eq!(runs[0]["passed"], 1);

    let (status, body) = get(&h.router, "/api/runs/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["avg_total_page_load_ms"], 321.0);
}

#[tokio::test]
async fn unknown_run_and_test_are_404() {
    let h = harness().await;
    let (status, _) = get(&h.router, "/api/runs/12345").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(&h.router, "/api/tests/12345").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_detail_translates_artifact_paths() {
    let h = harness().await;
    let (run_id, _) = h.coordinator.create_run(1, 1, None).await.unwrap();
    let m = TestMeasurement::synthetic(
        "https://container.example",
        "stub",
        TestStatus::Error,
        Some("no browser".into()),
        Utc::now(),
        0,
        "/app/test-history/2026-01-01T00-00-00-000Z__container.example/screenshot.png".into(),
        "/app/test-history/2026-01-01T00-00-00-000Z__container.example/network.har".into(),
    );
    let (test_id, _) = h.ingestor.ingest(run_id, m).await.unwrap();

    let (status, body) = get(&h.router, &format!("/api/tests/{test_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let shot = body["data"]["screenshot_path"].as_str().unwrap();
    assert_eq!(
        shot,
        "/test-history/2026-01-01T00-00-00-000Z__container.example/screenshot.png"
    );

    let (status, body) = get(&h.router, &format!("/api/runs/{run_id}/tests")).await;
    assert_eq!(status, StatusCode::OK);
    let tests = body["data"].as_array().unwrap();
    assert_eq!(tests.len(), 1);
    assert!(tests[0]["har_path"]
        .as_str()
        .unwrap()
        .starts_with("/test-history/"));
}

#[tokio::test]
async fn failed_requests_endpoint_reads_the_har() {
    let h = harness().await;
    let (_, test_id) = seed_passed_test(&h, "https://example.com").await;

    let (status, body) = get(
        &h.router,
        &format!("/api/tests/{test_id}/failed-requests"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let failed = body["data"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["status_code"], 404);
    assert_eq!(failed[0]["category"], "Client Error");
}

#[tokio::test]
async fn bad_timezone_is_400() {
    let h = harness().await;
    let (status, body) = get(
        &h.router,
        "/api/urls/example.com/daily-averages?days=7&timezone=Mars",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = get(
        &h.router,
        "/api/urls/example.com/daily-averages?days=7&timezone=Europe/Berlin",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn bad_calendar_date_is_400() {
    let h = harness().await;
    let (status, _) = get(&h.router, "/api/calendar/runs-by-date?date=today").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&h.router, "/api/calendar/runs-by-date").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_endpoints_cover_the_latest_run() {
    let h = harness().await;
    seed_passed_test(&h, "https://example.com").await;

    for uri in [
        "/api/stats/latest",
        "/api/stats/slowest",
        "/api/stats/fastest",
        "/api/stats/errors",
        "/api/calendar/available-dates",
        "/api/urls/autocomplete?q=ex",
        "/api/urls/example.com/tests",
    ] {
        let (status, body) = get(&h.router, uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body["success"], true, "{uri}");
    }
}
