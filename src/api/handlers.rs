// SPDX-License-Identifier: GPL-3.0-only
use axum::extract::Path;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::job::{JobStatus, Slot};
use crate::package::{GenerateParameters, PackageService, SyncParameters};
use crate::registry::PackageEntry;

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub name: Option<String>,
    pub parameters: GenerateParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStarted {
    pub slot: Slot,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    pub slot: Slot,
    pub active: bool,
    pub generation: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

pub struct ApiHandlers {
    service: Arc<PackageService>,
}

impl ApiHandlers {
    pub fn new(service: Arc<PackageService>) -> Self {
        Self { service }
    }
}

fn parse_slot(slot: &str) -> Result<Slot, StatusCode> {
    slot.parse().map_err(|e| {
        warn!(error = %e, "Rejected request for unknown slot");
        StatusCode::BAD_REQUEST
    })
}

impl ApiHandlers {
    pub async fn health() -> Json<ApiResponse<&'static str>> {
        Json(ApiResponse::success("ok"))
    }

    pub async fn generate(
        &self,
        Json(request): Json<GenerateRequest>,
    ) -> Result<Json<ApiResponse<JobStarted>>, (StatusCode, Json<ApiResponse<JobStarted>>)> {
        if let Err(e) = request.parameters.validate() {
            warn!(error = %e, "Rejected generate request");
            return Err((StatusCode::BAD_REQUEST, Json(ApiResponse::error(e))));
        }

        match self.service.generate(request.parameters, request.name, None) {
            Ok(generation) => Ok(Json(ApiResponse::success(JobStarted { slot: Slot::Download, generation }))),
            Err(e) => {
                error!(error = %e, "Failed to start generate job");
                Err((StatusCode::INTERNAL_SERVER_ERROR, Json(ApiResponse::error(e.to_string()))))
            }
        }
    }

    pub async fn synchronize(
        &self,
        Path(package_id): Path<String>,
        Json(params): Json<SyncParameters>,
    ) -> Result<Json<ApiResponse<JobStarted>>, StatusCode> {
        match self.service.get_package(&package_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(StatusCode::NOT_FOUND),
            Err(e) => {
                error!(error = %e, "Failed to look up package");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        match self.service.synchronize(&package_id, params, None).await {
            Ok(generation) => Ok(Json(ApiResponse::success(JobStarted { slot: Slot::Sync, generation }))),
            Err(e) => {
                error!(error = %e, package_id = %package_id, "Failed to start sync job");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub async fn cancel(&self, Path(slot): Path<String>) -> Result<Json<ApiResponse<SlotState>>, StatusCode> {
        let slot = parse_slot(&slot)?;
        info!(%slot, "Cancel request received");
        self.service.cancel(slot);
        Ok(Json(ApiResponse::success(self.slot_state(slot))))
    }

    pub async fn job_state(&self, Path(slot): Path<String>) -> Result<Json<ApiResponse<SlotState>>, StatusCode> {
        let slot = parse_slot(&slot)?;
        Ok(Json(ApiResponse::success(self.slot_state(slot))))
    }

    pub async fn list_packages(&self) -> Result<Json<ApiResponse<Vec<PackageEntry>>>, StatusCode> {
        match self.service.list_packages().await {
            Ok(packages) => Ok(Json(ApiResponse::success(packages))),
            Err(e) => {
                error!(error = %e, "Failed to list packages");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub async fn get_package(&self, Path(id): Path<String>) -> Result<Json<ApiResponse<PackageEntry>>, StatusCode> {
        match self.service.get_package(&id).await {
            Ok(Some(package)) => Ok(Json(ApiResponse::success(package))),
            Ok(None) => Err(StatusCode::NOT_FOUND),
            Err(e) => {
                error!(error = %e, "Failed to get package");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub async fn remove_package(&self, Path(id): Path<String>) -> Result<Json<ApiResponse<()>>, StatusCode> {
        match self.service.remove_package(&id).await {
            Ok(true) => Ok(Json(ApiResponse::success(()))),
            Ok(false) => Err(StatusCode::NOT_FOUND),
            Err(e) => {
                error!(error = %e, package_id = %id, "Failed to remove package");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Become the progress subscriber of the job in `slot`
    pub fn subscribe(&self, slot: &str) -> Result<(Slot, mpsc::UnboundedReceiver<JobStatus>), StatusCode> {
        let slot = parse_slot(slot)?;
        let updates = self.service.subscribe(slot).ok_or(StatusCode::NOT_FOUND)?;
        Ok((slot, updates))
    }

    pub fn cancel_slot(&self, slot: Slot) {
        self.service.cancel(slot);
    }

    fn slot_state(&self, slot: Slot) -> SlotState {
        let generation = self.service.active_generation(slot);
        SlotState { slot, active: generation.is_some(), generation }
    }
}
