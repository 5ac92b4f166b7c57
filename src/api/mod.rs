//! REST API for the session engine.
//!
//! - `GET  /`                   service info
//! - `POST /sessions`           register a meeting
//! - `GET  /sessions`           list sessions
//! - `GET  /sessions/:id`       one session
//! - `POST /sessions/:id/join`  start join-with-retry now

pub mod error;
pub mod routes;

use crate::config::ApiConfig;
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tracing::info;

pub struct ApiServer {
    port: u16,
    orchestrator: Orchestrator,
}

impl ApiServer {
    pub fn new(orchestrator: Orchestrator, config: &ApiConfig) -> Self {
        Self {
            port: config.port,
            orchestrator,
        }
    }

    pub fn router(orchestrator: Orchestrator) -> Router {
        Router::new()
            .route("/", get(status))
            .nest("/sessions", routes::sessions::router(orchestrator))
            .layer(ServiceBuilder::new())
    }

    pub async fn start(self) -> Result<()> {
        let app = Self::router(self.orchestrator);
        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("  POST /sessions          - Register a meeting");
        info!("  GET  /sessions          - List sessions");
        info!("  GET  /sessions/:id      - Session status");
        info!("  POST /sessions/:id/join - Join now");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "meetbot",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}
