/// Qdrant backup pipeline
///
/// For every collection of a framework's Qdrant instance: create a server-side
/// snapshot, stream it down, verify it, commit it with a sidecar and delete the
/// remote copy. A failing collection is counted and the rest keep going.

use async_trait::async_trait;
use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::core::docker::ContainerCheck;
use crate::core::error::{BackupError, Result};
use crate::core::metadata::{BackupDetails, BackupRecord};
use crate::core::pipeline::{BackupPipeline, FrameworkOutcome};
use crate::core::qdrant::{QdrantClient, SnapshotApi, SnapshotInfo};
use crate::core::registry::FrameworkRegistry;
use crate::core::store::{metadata_path_for, service_for, BackupStore};
use crate::utils::{created_by, format_bytes, render_container_name, AppConfig, Framework, ServiceType, CHECKSUM_ALGORITHM};

pub struct VectorPipeline {
    containers: Box<dyn ContainerCheck>,
    api: Box<dyn SnapshotApi>,
    store: BackupStore,
    config: AppConfig,
    port_override: Option<u16>,
}

impl VectorPipeline {
    pub fn new(containers: Box<dyn ContainerCheck>, api: Box<dyn SnapshotApi>, config: AppConfig) -> Self {
        Self {
            containers,
            api,
            store: BackupStore::new(&config.backup_dir),
            config,
            port_override: None,
        }
    }

    /// Talk to this port instead of the registry one
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port_override = port;
        self
    }

    fn container_name(&self, framework: &str) -> String {
        render_container_name(&self.config.qdrant.container_pattern, framework)
    }

    fn port_for(&self, framework: &Framework) -> u16 {
        self.port_override.unwrap_or(framework.qdrant_port)
    }

    /// Snapshot one collection; the remote snapshot is deleted whatever happens after creation
    async fn backup_collection(&self, base_url: &str, framework: &Framework, collection: &str) -> Result<PathBuf> {
        let snapshot = self
            .api
            .create_snapshot(base_url, collection)
            .await
            .map_err(|e| BackupError::Snapshot {
                collection: collection.to_string(),
                detail: e.to_string(),
            })?;

        let result = self.fetch_snapshot(base_url, framework, collection, &snapshot).await;

        if let Err(e) = self.api.delete_snapshot(base_url, collection, &snapshot.name).await {
            warn!(
                framework = framework.name,
                collection,
                snapshot = %snapshot.name,
                error = %e,
                "failed to delete remote snapshot"
            );
        }

        result
    }

    async fn fetch_snapshot(
        &self,
        base_url: &str,
        framework: &Framework,
        collection: &str,
        snapshot: &SnapshotInfo,
    ) -> Result<PathBuf> {
        let staged = self
            .store
            .stage(ServiceType::Vector, framework.name, collection, Local::now())?;

        self.api
            .download_snapshot(base_url, collection, &snapshot.name, staged.partial_path())
            .await?;

        let (file_size, checksum) = staged.measure()?;
        if let Some(remote) = &snapshot.checksum {
            if !remote.eq_ignore_ascii_case(&checksum) {
                return Err(BackupError::ChecksumMismatch {
                    path: staged.final_path().to_path_buf(),
                    expected: remote.clone(),
                    actual: checksum,
                });
            }
        }

        let record = BackupRecord {
            framework: framework.name.to_string(),
            service_type: ServiceType::Vector,
            timestamp: Utc::now(),
            backup_file: staged.file_name(),
            file_size,
            checksum,
            checksum_algorithm: CHECKSUM_ALGORITHM.to_string(),
            created_by: created_by(),
            host: self.config.host.clone(),
            port: self.port_for(framework),
            details: BackupDetails::Vector {
                collection: collection.to_string(),
                snapshot_name: snapshot.name.clone(),
                remote_checksum: snapshot.checksum.clone(),
            },
        };

        let path = staged.commit(&record)?;
        info!(
            framework = framework.name,
            collection,
            file = %path.display(),
            size = %format_bytes(file_size),
            "snapshot written"
        );
        Ok(path)
    }

    /// Upload a local snapshot into the collection it came from, or `collection_override`
    pub async fn restore(
        &self,
        archive: &Path,
        collection_override: Option<&str>,
        port_override: Option<u16>,
    ) -> Result<()> {
        if service_for(archive) != Some(ServiceType::Vector) {
            return Err(BackupError::Integrity {
                path: archive.to_path_buf(),
                reason: "not a Qdrant snapshot (expected .snapshot)".to_string(),
            });
        }
        let sidecar = metadata_path_for(archive, ServiceType::Vector)
            .filter(|p| p.is_file())
            .ok_or_else(|| BackupError::MissingMetadata(archive.to_path_buf()))?;
        let record = BackupRecord::load(&sidecar)?;
        record.verify_artifact(archive)?;

        let collection = match collection_override.or(record.collection()) {
            Some(c) => c.to_string(),
            None => {
                return Err(BackupError::Integrity {
                    path: sidecar,
                    reason: "sidecar does not describe a vector backup".to_string(),
                })
            }
        };

        let framework = FrameworkRegistry::new().resolve(&record.framework)?.clone();
        let container = self.container_name(framework.name);
        if !self.containers.is_running(&container).await {
            return Err(BackupError::ServiceUnavailable {
                framework: framework.name.to_string(),
                service: "qdrant".to_string(),
                reason: format!("container {} is not running", container),
            });
        }

        let base_url = QdrantClient::base_url(&record.host, port_override.unwrap_or(record.port));
        self.api.health(&base_url).await?;
        self.api.upload_snapshot(&base_url, &collection, archive).await?;

        info!(
            framework = framework.name,
            collection = %collection,
            "collection recovered from {}",
            archive.display()
        );
        Ok(())
    }
}

#[async_trait]
impl BackupPipeline for VectorPipeline {
    fn service(&self) -> ServiceType {
        ServiceType::Vector
    }

    fn store(&self) -> &BackupStore {
        &self.store
    }

    fn retention_days(&self) -> u32 {
        self.config.retention_days
    }

    async fn backup_framework(&self, framework: &Framework) -> FrameworkOutcome {
        let container = self.container_name(framework.name);
        if !self.containers.is_running(&container).await {
            return FrameworkOutcome::Skipped {
                reason: format!("qdrant container {} is not running", container),
            };
        }

        let base_url = QdrantClient::base_url(&self.config.host, self.port_for(framework));
        if let Err(e) = self.api.health(&base_url).await {
            return FrameworkOutcome::Skipped {
                reason: format!("qdrant at {} is not healthy: {}", base_url, e),
            };
        }

        let collections = match self.api.list_collections(&base_url).await {
            Ok(collections) => collections,
            Err(e) => {
                error!(framework = framework.name, error = %e, "could not list collections");
                return FrameworkOutcome::Failed {
                    succeeded: 0,
                    total: 0,
                    errors: vec![e.to_string()],
                };
            }
        };

        if collections.is_empty() {
            info!(framework = framework.name, "no collections to back up");
            return FrameworkOutcome::Succeeded { artifacts: Vec::new() };
        }

        let total = collections.len();
        let mut artifacts = Vec::with_capacity(total);
        let mut errors = Vec::new();

        for collection in &collections {
            match self.backup_collection(&base_url, framework, collection).await {
                Ok(path) => artifacts.push(path),
                Err(e) => {
                    error!(framework = framework.name, collection = %collection, error = %e, "collection backup failed");
                    errors.push(format!("{}: {}", collection, e));
                }
            }
        }

        info!(framework = framework.name, "{}/{} collections backed up", artifacts.len(), total);

        if errors.is_empty() {
            FrameworkOutcome::Succeeded { artifacts }
        } else {
            FrameworkOutcome::Failed {
                succeeded: artifacts.len(),
                total,
                errors,
            }
        }
    }
}
