// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::registry::models::PackageEntry;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Add a new package entry to the registry
    async fn add_package(&self, entry: PackageEntry) -> anyhow::Result<()>;

    /// Remove a package entry from the registry
    async fn remove_package(&self, id: &str) -> anyhow::Result<()>;

    /// Get a package entry by ID
    async fn get_package(&self, id: &str) -> anyhow::Result<Option<PackageEntry>>;

    /// Find the package stored at a local path
    async fn find_by_local_path(&self, local_path: &str) -> anyhow::Result<Option<PackageEntry>>;

    /// List all package entries
    async fn list_packages(&self) -> anyhow::Result<Vec<PackageEntry>>;

    /// Update an existing package entry
    async fn update_package(&self, entry: PackageEntry) -> anyhow::Result<()>;

    /// Record a completed synchronization. Returns false if the package is unknown.
    async fn mark_synced(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<bool>;
}
