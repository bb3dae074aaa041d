// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};

use crate::job::{JobRequest, OperationKind};

/// Bounding box of the area to take offline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn validate(&self) -> Result<(), String> {
        let coords = [self.xmin, self.ymin, self.xmax, self.ymax];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err("Extent coordinates must be finite numbers".to_string());
        }
        if self.xmin >= self.xmax || self.ymin >= self.ymax {
            return Err(format!(
                "Malformed extent: ({}, {}) - ({}, {})",
                self.xmin, self.ymin, self.xmax, self.ymax
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncModel {
    #[default]
    PerLayer,
    PerReplica,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    #[default]
    Bidirectional,
    Upload,
    Download,
}

/// Parameters of a package export job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateParameters {
    /// Layer ids of the feature service to include
    pub layers: Vec<u32>,

    pub extent: Extent,

    /// Well-known id of the output spatial reference
    #[serde(default)]
    pub out_spatial_reference: Option<u32>,

    #[serde(default)]
    pub sync_model: SyncModel,

    #[serde(default = "default_return_attachments")]
    pub return_attachments: bool,
}

fn default_return_attachments() -> bool {
    true
}

impl GenerateParameters {
    pub fn validate(&self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("Layer set cannot be empty".to_string());
        }
        self.extent.validate()
    }
}

/// Parameters of a package synchronization job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncParameters {
    #[serde(default)]
    pub sync_direction: SyncDirection,

    #[serde(default)]
    pub rollback_on_failure: bool,
}

/// Check the parameter bag of a request against its operation kind
pub fn validate_request(request: &JobRequest) -> Result<(), String> {
    match request.operation {
        OperationKind::Generate => {
            let params: GenerateParameters = serde_json::from_value(request.parameters.clone())
                .map_err(|e| format!("Invalid generate parameters: {}", e))?;
            params.validate()
        }
        OperationKind::Synchronize => {
            serde_json::from_value::<SyncParameters>(request.parameters.clone())
                .map_err(|e| format!("Invalid sync parameters: {}", e))?;
            if request.target.get("package_id").and_then(|v| v.as_str()).is_none() {
                return Err("Sync target must name a package_id".to_string());
            }
            Ok(())
        }
    }
}
