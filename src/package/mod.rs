// SPDX-License-Identifier: GPL-3.0-only
pub mod params;
pub mod service;
pub mod sinks;

pub use params::{Extent, GenerateParameters, SyncDirection, SyncModel, SyncParameters};
pub use service::PackageService;
pub use sinks::{PackageDownloadSink, SinkReport, SyncCompleteSink};
