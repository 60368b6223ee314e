/// Backup metadata sidecars
///
/// Every committed artifact has a `{stem}.metadata.json` next to it recording
/// provenance and the SHA-256 of the artifact bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{BackupError, Result};
use crate::utils::{sha256_file, ServiceType};

/// One completed backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub framework: String,
    pub service_type: ServiceType,
    pub timestamp: DateTime<Utc>,
    pub backup_file: String,
    pub file_size: u64,
    pub checksum: String,
    pub checksum_algorithm: String,
    pub created_by: String,
    pub host: String,
    pub port: u16,
    #[serde(flatten)]
    pub details: BackupDetails,
}

/// Service-specific sidecar fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackupDetails {
    Database {
        database: String,
        user: String,
        dump_tool_version: String,
    },
    Vector {
        collection: String,
        snapshot_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote_checksum: Option<String>,
    },
}

impl BackupRecord {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Collection name for vector backups
    pub fn collection(&self) -> Option<&str> {
        match &self.details {
            BackupDetails::Vector { collection, .. } => Some(collection),
            BackupDetails::Database { .. } => None,
        }
    }

    /// Recompute the artifact checksum and compare with the recorded one
    pub fn verify_artifact(&self, artifact: &Path) -> Result<()> {
        let size = std::fs::metadata(artifact)?.len();
        if size == 0 {
            return Err(BackupError::Integrity {
                path: artifact.to_path_buf(),
                reason: "artifact is empty".to_string(),
            });
        }

        let actual = sha256_file(artifact)?;
        if actual != self.checksum {
            return Err(BackupError::ChecksumMismatch {
                path: artifact.to_path_buf(),
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{created_by, CHECKSUM_ALGORITHM};

    fn vector_record(checksum: &str) -> BackupRecord {
        BackupRecord {
            framework: "dspy".to_string(),
            service_type: ServiceType::Vector,
            timestamp: Utc::now(),
            backup_file: "dspy_documents_20261018_120000.snapshot".to_string(),
            file_size: 3,
            checksum: checksum.to_string(),
            checksum_algorithm: CHECKSUM_ALGORITHM.to_string(),
            created_by: created_by(),
            host: "localhost".to_string(),
            port: 6334,
            details: BackupDetails::Vector {
                collection: "documents".to_string(),
                snapshot_name: "documents-2026.snapshot".to_string(),
                remote_checksum: None,
            },
        }
    }

    #[test]
    fn test_sidecar_fields_are_flat() {
        let json = vector_record("abc").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["framework"], "dspy");
        assert_eq!(value["service_type"], "vector");
        assert_eq!(value["collection"], "documents");
        assert_eq!(value["snapshot_name"], "documents-2026.snapshot");
        assert!(value.get("remote_checksum").is_none());
        assert!(value.get("details").is_none());
    }

    #[test]
    fn test_database_sidecar_parses() {
        let json = r#"{
            "framework": "crewai",
            "service_type": "database",
            "timestamp": "2026-10-18T12:00:00Z",
            "backup_file": "crewai_langfuse_20261018_120000.sql.gz",
            "file_size": 1024,
            "checksum": "00ff",
            "checksum_algorithm": "sha256",
            "created_by": "fwbackup 0.1.0",
            "host": "localhost",
            "port": 5432,
            "database": "langfuse",
            "user": "langfuse_user",
            "dump_tool_version": "pg_dump (PostgreSQL) 16.2"
        }"#;

        let record: BackupRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.service_type, ServiceType::Database);
        assert_eq!(record.collection(), None);
        assert!(matches!(record.details, BackupDetails::Database { ref database, .. } if database == "langfuse"));
    }

    #[test]
    fn test_verify_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("a.snapshot");
        std::fs::write(&artifact, b"abc").unwrap();

        let good = vector_record("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert!(good.verify_artifact(&artifact).is_ok());

        let bad = vector_record("deadbeef");
        assert!(matches!(
            bad.verify_artifact(&artifact),
            Err(BackupError::ChecksumMismatch { .. })
        ));

        std::fs::write(&artifact, b"").unwrap();
        assert!(matches!(good.verify_artifact(&artifact), Err(BackupError::Integrity { .. })));
    }
}
