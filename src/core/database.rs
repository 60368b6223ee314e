/// PostgreSQL backup pipeline
///
/// One compressed `pg_dump` per framework, checked with `gzip -t` before it is
/// committed next to its metadata sidecar.

use async_trait::async_trait;
use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::core::docker::ContainerCheck;
use crate::core::error::{BackupError, Result};
use crate::core::metadata::{BackupDetails, BackupRecord};
use crate::core::pipeline::{BackupPipeline, FrameworkOutcome};
use crate::core::registry::FrameworkRegistry;
use crate::core::store::{metadata_path_for, service_for, BackupStore};
use crate::core::tools::{DumpTarget, DumpTool};
use crate::utils::{created_by, format_bytes, render_container_name, AppConfig, Framework, ServiceType, CHECKSUM_ALGORITHM};

pub struct DatabasePipeline {
    containers: Box<dyn ContainerCheck>,
    dumper: Box<dyn DumpTool>,
    store: BackupStore,
    config: AppConfig,
    port_override: Option<u16>,
}

impl DatabasePipeline {
    pub fn new(
        containers: Box<dyn ContainerCheck>,
        dumper: Box<dyn DumpTool>,
        config: AppConfig,
    ) -> Self {
        Self {
            containers,
            dumper,
            store: BackupStore::new(&config.backup_dir),
            config,
            port_override: None,
        }
    }

    /// Dump from this port instead of the registry one
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port_override = port;
        self
    }

    fn container_name(&self, framework: &str) -> String {
        render_container_name(&self.config.postgres.container_pattern, framework)
    }

    fn target(&self, port: u16) -> DumpTarget {
        DumpTarget {
            host: self.config.host.clone(),
            port,
            user: self.config.postgres.user.clone(),
            database: self.config.postgres.database.clone(),
            password: self.config.postgres.password.clone(),
        }
    }

    /// Dump, compress, verify and commit; any error leaves no partial file behind
    fn dump_framework(&self, framework: &Framework) -> Result<PathBuf> {
        let target = self.target(self.port_override.unwrap_or(framework.postgres_port));
        let dump_tool_version = self.dumper.version()?;

        let staged = self
            .store
            .stage(ServiceType::Database, framework.name, &target.database, Local::now())?;

        self.dumper.dump_compressed(&target, staged.partial_path())?;
        self.dumper.verify_archive(staged.partial_path())?;
        let (file_size, checksum) = staged.measure()?;

        let record = BackupRecord {
            framework: framework.name.to_string(),
            service_type: ServiceType::Database,
            timestamp: Utc::now(),
            backup_file: staged.file_name(),
            file_size,
            checksum,
            checksum_algorithm: CHECKSUM_ALGORITHM.to_string(),
            created_by: created_by(),
            host: target.host.clone(),
            port: target.port,
            details: BackupDetails::Database {
                database: target.database.clone(),
                user: target.user.clone(),
                dump_tool_version,
            },
        };

        let path = staged.commit(&record)?;
        info!(
            framework = framework.name,
            file = %path.display(),
            size = %format_bytes(file_size),
            "database dump written"
        );
        Ok(path)
    }

    /// Replay a dump into the instance it was taken from, or into `port_override`
    pub async fn restore(&self, archive: &Path, port_override: Option<u16>) -> Result<()> {
        if service_for(archive) != Some(ServiceType::Database) {
            return Err(BackupError::Integrity {
                path: archive.to_path_buf(),
                reason: "not a database dump (expected .sql.gz)".to_string(),
            });
        }
        let sidecar = metadata_path_for(archive, ServiceType::Database)
            .filter(|p| p.is_file())
            .ok_or_else(|| BackupError::MissingMetadata(archive.to_path_buf()))?;
        let record = BackupRecord::load(&sidecar)?;
        record.verify_artifact(archive)?;

        let framework = FrameworkRegistry::new().resolve(&record.framework)?.clone();
        let container = self.container_name(framework.name);
        if !self.containers.is_running(&container).await {
            return Err(BackupError::ServiceUnavailable {
                framework: framework.name.to_string(),
                service: "postgres".to_string(),
                reason: format!("container {} is not running", container),
            });
        }

        let mut target = self.target(port_override.unwrap_or(record.port));
        target.host = record.host.clone();
        if let BackupDetails::Database { database, .. } = &record.details {
            target.database = database.clone();
        }

        self.dumper.verify_archive(archive)?;
        self.dumper.restore(&target, archive)?;
        info!(
            framework = framework.name,
            database = %target.database,
            port = target.port,
            "database restored from {}",
            archive.display()
        );
        Ok(())
    }
}

#[async_trait]
impl BackupPipeline for DatabasePipeline {
    fn service(&self) -> ServiceType {
        ServiceType::Database
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
                reason: format!("postgres container {} is not running", container),
            };
        }

        match self.dump_framework(framework) {
            Ok(path) => FrameworkOutcome::Succeeded {
                artifacts: vec![path],
            },
            Err(e) => {
                error!(framework = framework.name, error = %e, "database backup failed");
                FrameworkOutcome::Failed {
                    succeeded: 0,
                    total: 1,
                    errors: vec![e.to_string()],
                }
            }
        }
    }
}
