//! HTTP read API for the dashboard.
//!
//! A thin JSON facade over the query layer. Every payload uses the
//! `{success, data?, error?}` envelope; validation failures map to 400,
//! absent entities to 404, everything else to 500.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;

use crate::config::Settings;
use crate::queries::QueryService;
use crate::repository::{RunRepository, SqlitePool, UrlTestRepository};

/// Shared state for the API server.
#[derive(Clone)]
pub struct AppState {
    pub queries: QueryService,
    pub pool: SqlitePool,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Self {
        let runs = RunRepository::new(pool.clone());
        let tests = UrlTestRepository::new(pool.clone());
        Self {
            queries: QueryService::new(runs, tests),
            pool,
        }
    }
}

/// Start the API server.
pub async fn serve(settings: &Settings, pool: SqlitePool) -> anyhow::Result<()> {
    let state = AppState::new(pool);
    let app = create_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", settings.port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
