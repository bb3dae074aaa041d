// SPDX-License-Identifier: GPL-3.0-only
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use crate::api::handlers::{ApiHandlers, ApiResponse, GenerateRequest, JobStarted, SlotState};
use crate::api::websocket::WebSocketServer;
use crate::package::{PackageService, SyncParameters};
use crate::registry::PackageEntry;

pub struct HttpServer {
    handlers: ApiHandlers,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(service: Arc<PackageService>, addr: SocketAddr) -> Self {
        Self {
            handlers: ApiHandlers::new(service),
            addr,
        }
    }

    pub fn router(self) -> Router {
        let handlers = Arc::new(self.handlers);

        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/generate", post(generate_handler))
            .route("/api/sync/:package_id", post(synchronize_handler))
            .route("/api/jobs/:slot", get(job_state_handler))
            .route("/api/jobs/:slot/cancel", post(cancel_handler))
            .route("/api/packages", get(list_packages_handler))
            .route("/api/packages/:id", get(get_package_handler).delete(remove_package_handler))
            .with_state(handlers.clone())
            .merge(WebSocketServer::new(handlers).router())
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.addr;
        let app = self.router();

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn health_handler() -> Json<ApiResponse<&'static str>> {
    ApiHandlers::health().await
}

async fn generate_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<ApiResponse<JobStarted>>, (StatusCode, Json<ApiResponse<JobStarted>>)> {
    handlers.generate(Json(request)).await
}

async fn synchronize_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    Path(package_id): Path<String>,
    Json(params): Json<SyncParameters>,
) -> Result<Json<ApiResponse<JobStarted>>, StatusCode> {
    handlers.synchronize(Path(package_id), Json(params)).await
}

async fn job_state_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    Path(slot): Path<String>,
) -> Result<Json<ApiResponse<SlotState>>, StatusCode> {
    handlers.job_state(Path(slot)).await
}

async fn cancel_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    Path(slot): Path<String>,
) -> Result<Json<ApiResponse<SlotState>>, StatusCode> {
    handlers.cancel(Path(slot)).await
}

async fn list_packages_handler(
    State(handlers): State<Arc<ApiHandlers>>,
) -> Result<Json<ApiResponse<Vec<PackageEntry>>>, StatusCode> {
    handlers.list_packages().await
}

async fn get_package_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PackageEntry>>, StatusCode> {
    handlers.get_package(Path(id)).await
}

async fn remove_package_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, StatusCode> {
    handlers.remove_package(Path(id)).await
}
