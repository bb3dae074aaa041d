// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Unique identifier for the package
    pub id: String,

    /// Display name of the package
    pub name: String,

    /// Feature service the package was generated from
    pub service_url: String,

    /// Absolute path of the package file on disk
    pub local_path: String,

    /// When the package was (last) generated
    pub created_at: DateTime<Utc>,

    /// Last successful synchronization, if any
    pub last_synced_at: Option<DateTime<Utc>>,

    /// File checksum (MD5 hex string)
    pub checksum: Option<String>,

    /// Checksum algorithm kind (currently only "md5")
    pub checksum_kind: Option<String>,
}

impl PackageEntry {
    pub fn new(name: String, service_url: String, local_path: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            service_url,
            local_path,
            created_at: Utc::now(),
            last_synced_at: None,
            checksum: None,
            checksum_kind: None,
        }
    }

    pub fn with_md5(mut self, checksum: String) -> Self {
        self.checksum = Some(checksum);
        self.checksum_kind = Some("md5".to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_entry_new() {
        let entry = PackageEntry::new(
            "Wildlife".to_string(),
            "https://gis.example.com/FeatureServer".to_string(),
            "/var/lib/offline-sync/packages/wildlife.geodatabase".to_string(),
        );

        assert!(uuid::Uuid::parse_str(&entry.id).is_ok());
        assert_eq!(entry.name, "Wildlife");
        assert_eq!(entry.last_synced_at, None);
        assert_eq!(entry.checksum, None);
        assert_eq!(entry.checksum_kind, None);
        assert!(entry.created_at <= Utc::now());
    }

    #[test]
    fn test_package_entry_ids_are_unique() {
        let a = PackageEntry::new("a".to_string(), "u".to_string(), "p".to_string());
        let b = PackageEntry::new("a".to_string(), "u".to_string(), "p".to_string());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_with_md5() {
        let entry = PackageEntry::new("a".to_string(), "u".to_string(), "p".to_string())
            .with_md5("5eb63bbbe01eeed093cb22bb8f5acdc3".to_string());

        assert_eq!(entry.checksum.as_deref(), Some("5eb63bbbe01eeed093cb22bb8f5acdc3"));
        assert_eq!(entry.checksum_kind.as_deref(), Some("md5"));
    }

    #[test]
    fn test_package_entry_serialize_json() {
        let mut entry = PackageEntry::new(
            "Wildlife".to_string(),
            "https://gis.example.com/FeatureServer".to_string(),
            "/data/wildlife.geodatabase".to_string(),
        )
        .with_md5("abc123".to_string());
        entry.id = "pkg-1".to_string();

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"id\":\"pkg-1\""));
        assert!(json.contains("\"service_url\":\"https://gis.example.com/FeatureServer\""));
        assert!(json.contains("\"local_path\":\"/data/wildlife.geodatabase\""));
        assert!(json.contains("\"last_synced_at\":null"));
        assert!(json.contains("\"checksum_kind\":\"md5\""));
    }

    #[test]
    fn test_package_entry_deserialize_json() {
        let json = r#"{
            "id": "pkg-1",
            "name": "Wildlife",
            "service_url": "https://gis.example.com/FeatureServer",
            "local_path": "/data/wildlife.geodatabase",
            "created_at": "2024-01-01T00:00:00Z",
            "last_synced_at": "2024-01-02T12:30:00Z",
            "checksum": null,
            "checksum_kind": null
        }"#;

        let entry: PackageEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.id, "pkg-1");
        assert_eq!(entry.local_path, "/data/wildlife.geodatabase");
        assert_eq!(
            entry.last_synced_at.map(|t| t.to_rfc3339()),
            Some("2024-01-02T12:30:00+00:00".to_string())
        );
        assert_eq!(entry.checksum, None);
    }
}
