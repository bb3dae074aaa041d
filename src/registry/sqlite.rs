// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use crate::registry::{models::PackageEntry, traits::Registry};
use tracing::{error, info};

pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub async fn new(db_path: &Path) -> anyhow::Result<Self> {
        let db_url = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        // Every connection to ":memory:" is its own database, so keep exactly one alive
        let pool = if db_path.as_os_str() == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePool::connect_with(options).await?
        };

        let registry = Self { pool };
        registry.init_schema().await?;

        Ok(registry)
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                service_url TEXT NOT NULL,
                local_path TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                last_synced_at TEXT,
                checksum TEXT,
                checksum_kind TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Initialized SQLite registry schema");
        Ok(())
    }

    fn package_entry_from_row(row: &SqliteRow) -> anyhow::Result<PackageEntry> {
        let last_synced_at = row
            .get::<Option<String>, _>("last_synced_at")
            .map(|s| parse_timestamp(&s))
            .transpose()?;

        Ok(PackageEntry {
            id: row.get::<String, _>("id"),
            name: row.get::<String, _>("name"),
            service_url: row.get::<String, _>("service_url"),
            local_path: row.get::<String, _>("local_path"),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            last_synced_at,
            checksum: row.get::<Option<String>, _>("checksum"),
            checksum_kind: row.get::<Option<String>, _>("checksum_kind"),
        })
    }
}

fn parse_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn add_package(&self, entry: PackageEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO packages (id, name, service_url, local_path, created_at, last_synced_at, checksum, checksum_kind)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.name)
        .bind(&entry.service_url)
        .bind(&entry.local_path)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.last_synced_at.map(|t| t.to_rfc3339()))
        .bind(&entry.checksum)
        .bind(&entry.checksum_kind)
        .execute(&self.pool)
        .await?;

        info!(package_id = %entry.id, "Added package to registry");
        Ok(())
    }

    async fn remove_package(&self, id: &str) -> anyhow::Result<()> {
        let result = sqlx::query("DELETE FROM packages WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            info!(package_id = %id, "Removed package from registry");
        }

        Ok(())
    }

    async fn get_package(&self, id: &str) -> anyhow::Result<Option<PackageEntry>> {
        let row = sqlx::query("SELECT * FROM packages WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::package_entry_from_row).transpose()
    }

    async fn find_by_local_path(&self, local_path: &str) -> anyhow::Result<Option<PackageEntry>> {
        let row = sqlx::query("SELECT * FROM packages WHERE local_path = ?1")
            .bind(local_path)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::package_entry_from_row).transpose()
    }

    async fn list_packages(&self) -> anyhow::Result<Vec<PackageEntry>> {
        let rows = sqlx::query("SELECT * FROM packages ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::new();
        for row in rows {
            match Self::package_entry_from_row(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    error!(error = %e, "Failed to parse package entry from database");
                }
            }
        }

        Ok(entries)
    }

    async fn update_package(&self, entry: PackageEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE packages
            SET name = ?2, service_url = ?3, local_path = ?4, created_at = ?5, last_synced_at = ?6, checksum = ?7, checksum_kind = ?8
            WHERE id = ?1
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.name)
        .bind(&entry.service_url)
        .bind(&entry.local_path)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.last_synced_at.map(|t| t.to_rfc3339()))
        .bind(&entry.checksum)
        .bind(&entry.checksum_kind)
        .execute(&self.pool)
        .await?;

        info!(package_id = %entry.id, "Updated package in registry");
        Ok(())
    }

    async fn mark_synced(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE packages SET last_synced_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
