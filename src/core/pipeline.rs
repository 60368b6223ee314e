/// Shared driver for the database and vector pipelines
///
/// Frameworks run one after another. A skip or failure in one framework never
/// stops the next one; the summary decides the process exit code.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{error, info, warn};

use crate::core::error::Result;
use crate::core::metadata::BackupRecord;
use crate::core::store::{BackupStore, CleanupReport};
use crate::utils::{Framework, ServiceType};

/// What happened to one framework during a backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameworkOutcome {
    /// Every unit (the database, or each collection) was backed up
    Succeeded { artifacts: Vec<PathBuf> },
    /// Service not running or not healthy
    Skipped { reason: String },
    /// At least one unit failed; `succeeded` of `total` made it
    Failed {
        succeeded: usize,
        total: usize,
        errors: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkReport {
    pub framework: String,
    pub outcome: FrameworkOutcome,
}

/// Result of a whole `backup` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub service: Option<ServiceType>,
    pub reports: Vec<FrameworkReport>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, FrameworkOutcome::Succeeded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FrameworkOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FrameworkOutcome::Failed { .. }))
    }

    pub fn artifacts(&self) -> Vec<&PathBuf> {
        self.reports
            .iter()
            .filter_map(|r| match &r.outcome {
                FrameworkOutcome::Succeeded { artifacts } => Some(artifacts),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// 0 on full success or skips only, 1 when any framework failed
    pub fn exit_code(&self) -> u8 {
        if self.failed() > 0 {
            1
        } else {
            0
        }
    }

    /// `success/total` line printed at the end of a run
    pub fn summary_line(&self) -> String {
        let service = self.service.map(|s| s.as_str()).unwrap_or("backup");
        format!(
            "{} backup: {}/{} frameworks succeeded ({} skipped, {} failed)",
            service,
            self.succeeded(),
            self.total(),
            self.skipped(),
            self.failed()
        )
    }

    fn count(&self, pred: impl Fn(&FrameworkOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// One backup pipeline: a service type plus how to back up a single framework
#[async_trait]
pub trait BackupPipeline: Send + Sync {
    fn service(&self) -> ServiceType;

    fn store(&self) -> &BackupStore;

    fn retention_days(&self) -> u32;

    async fn backup_framework(&self, framework: &Framework) -> FrameworkOutcome;
}

/// Back up each framework in order, pruning old backups after each success
pub async fn run_backups<P>(pipeline: &P, frameworks: &[&Framework]) -> RunSummary
where
    P: BackupPipeline + ?Sized,
{
    let service = pipeline.service();
    let mut summary = RunSummary {
        service: Some(service),
        reports: Vec::with_capacity(frameworks.len()),
    };

    for framework in frameworks {
        info!(framework = framework.name, service = %service, "starting backup");
        let outcome = pipeline.backup_framework(framework).await;

        match &outcome {
            FrameworkOutcome::Succeeded { artifacts } => {
                info!(framework = framework.name, artifacts = artifacts.len(), "backup complete");
                prune(pipeline.store(), service, framework.name, pipeline.retention_days(), artifacts);
            }
            FrameworkOutcome::Skipped { reason } => {
                warn!(framework = framework.name, "skipping: {}", reason);
            }
            FrameworkOutcome::Failed { succeeded, total, .. } => {
                error!(framework = framework.name, "backup failed ({}/{} succeeded)", succeeded, total);
            }
        }

        summary.reports.push(FrameworkReport {
            framework: framework.name.to_string(),
            outcome,
        });
    }

    summary
}

/// Apply retention after a successful run; what this run produced is never pruned
fn prune(store: &BackupStore, service: ServiceType, framework: &str, retention_days: u32, fresh: &[PathBuf]) {
    match store.cleanup_keeping(service, framework, retention_days, SystemTime::now(), fresh) {
        Ok(report) if !report.removed_files.is_empty() => {
            info!(framework, removed = report.artifacts_removed(), "pruned old backups");
        }
        Ok(_) => {}
        Err(e) => warn!(framework, error = %e, "retention cleanup failed"),
    }
}

/// Apply the retention window to each framework
pub fn cleanup_frameworks(
    store: &BackupStore,
    service: ServiceType,
    frameworks: &[&Framework],
    retention_days: u32,
    now: SystemTime,
) -> Result<Vec<(String, CleanupReport)>> {
    let mut reports = Vec::with_capacity(frameworks.len());
    for framework in frameworks {
        let report = store.cleanup(service, framework.name, retention_days, now)?;
        if !report.removed_files.is_empty() {
            info!(framework = framework.name, service = %service, removed = report.artifacts_removed(), "cleanup");
        }
        reports.push((framework.name.to_string(), report));
    }
    Ok(reports)
}

/// A committed artifact that failed re-verification
#[derive(Debug, Clone)]
pub struct VerifyProblem {
    pub path: PathBuf,
    pub reason: String,
}

/// Re-check every committed artifact against its sidecar
pub fn verify_artifacts(
    store: &BackupStore,
    service: ServiceType,
    frameworks: &[&Framework],
) -> Result<(usize, Vec<VerifyProblem>)> {
    let names: Vec<&str> = frameworks.iter().map(|f| f.name).collect();
    let entries = store.list(service, &names)?;
    let mut problems = Vec::new();

    for entry in &entries {
        let Some(sidecar) = &entry.metadata_path else {
            problems.push(VerifyProblem {
                path: entry.path.clone(),
                reason: "metadata sidecar missing".to_string(),
            });
            continue;
        };

        let checked = BackupRecord::load(sidecar).and_then(|record| record.verify_artifact(&entry.path));
        if let Err(e) = checked {
            problems.push(VerifyProblem {
                path: entry.path.clone(),
                reason: e.to_string(),
            });
        }
    }

    Ok((entries.len(), problems))
}
