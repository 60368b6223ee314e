/// Backup directory layout, staging and retention
///
/// Layout: `{root}/{service_type}/{framework}/{framework}_{identifier}_{timestamp}.{ext}`
/// with a `{stem}.metadata.json` sidecar next to each artifact.
///
/// Artifacts are written as `*.partial` and only renamed into place once they
/// have been verified, so a sidecar never points at a missing or empty file.

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::core::error::{BackupError, Result};
use crate::core::metadata::BackupRecord;
use crate::utils::{remove_if_exists, sha256_file, ServiceType, METADATA_SUFFIX, PARTIAL_SUFFIX, TIMESTAMP_FORMAT};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

/// A committed artifact found on disk
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub framework: String,
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub modified: SystemTime,
    pub metadata_path: Option<PathBuf>,
}

/// Files removed by one cleanup pass
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    pub removed_files: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn artifacts_removed(&self) -> usize {
        self.removed_files
            .iter()
            .filter(|p| !is_sidecar(p) && !is_partial(p))
            .count()
    }
}

impl BackupStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn service_dir(&self, service: ServiceType) -> PathBuf {
        self.root.join(service.as_str())
    }

    pub fn framework_dir(&self, service: ServiceType, framework: &str) -> PathBuf {
        self.service_dir(service).join(framework)
    }

    /// Reserve a new artifact path and hand back a guard for its `.partial` file
    pub fn stage(
        &self,
        service: ServiceType,
        framework: &str,
        identifier: &str,
        at: DateTime<Local>,
    ) -> Result<StagedArtifact> {
        let dir = self.framework_dir(service, framework);
        fs::create_dir_all(&dir)?;

        let stem = format!(
            "{}_{}_{}",
            framework,
            sanitize_identifier(identifier),
            at.format(TIMESTAMP_FORMAT)
        );
        let final_path = dir.join(format!("{}.{}", stem, service.extension()));
        let metadata_path = dir.join(format!("{}{}", stem, METADATA_SUFFIX));
        let partial_path = append_suffix(&final_path, PARTIAL_SUFFIX);

        // Never overwrite another artifact written in the same second
        if let Some(taken) = [&final_path, &metadata_path, &partial_path]
            .into_iter()
            .find(|p| p.exists())
        {
            return Err(BackupError::Integrity {
                path: taken.clone(),
                reason: "an artifact with this name already exists".to_string(),
            });
        }

        Ok(StagedArtifact {
            final_path,
            partial_path,
            metadata_path,
            committed: false,
        })
    }

    /// Committed artifacts for the given frameworks, sorted by file name
    pub fn list(&self, service: ServiceType, frameworks: &[&str]) -> Result<Vec<ArtifactEntry>> {
        let mut entries = Vec::new();

        for framework in frameworks {
            let dir = self.framework_dir(service, framework);
            if !dir.is_dir() {
                continue;
            }

            let mut found = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some(stem) = artifact_stem(file_name, service) else {
                    continue;
                };

                let meta = entry.metadata()?;
                if !meta.is_file() {
                    continue;
                }

                let sidecar = dir.join(format!("{}{}", stem, METADATA_SUFFIX));
                found.push(ArtifactEntry {
                    framework: framework.to_string(),
                    file_name: file_name.to_string(),
                    size: meta.len(),
                    modified: meta.modified()?,
                    metadata_path: sidecar.is_file().then_some(sidecar),
                    path,
                });
            }

            found.sort_by(|a, b| a.file_name.cmp(&b.file_name));
            entries.extend(found);
        }

        Ok(entries)
    }

    /// Delete artifacts (with their sidecars) and leftovers older than the retention window
    ///
    /// A file aged exactly `retention_days` is kept. Empty framework directories are removed.
    pub fn cleanup(
        &self,
        service: ServiceType,
        framework: &str,
        retention_days: u32,
        now: SystemTime,
    ) -> Result<CleanupReport> {
        self.cleanup_keeping(service, framework, retention_days, now, &[])
    }

    /// Same as `cleanup`, but the artifacts in `keep` survive whatever their age
    pub fn cleanup_keeping(
        &self,
        service: ServiceType,
        framework: &str,
        retention_days: u32,
        now: SystemTime,
        keep: &[PathBuf],
    ) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let dir = self.framework_dir(service, framework);
        if !dir.is_dir() {
            return Ok(report);
        }

        let window = Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY);
        let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
        let expired = |path: &Path| -> Result<bool> {
            Ok(fs::metadata(path)?.modified()? < cutoff)
        };

        // Artifacts decide for their sidecar, sidecar goes first
        for entry in self.list(service, &[framework])? {
            if keep.contains(&entry.path) || !expired(&entry.path)? {
                continue;
            }
            if let Some(sidecar) = entry.metadata_path {
                remove_if_exists(&sidecar)?;
                report.removed_files.push(sidecar);
            }
            remove_if_exists(&entry.path)?;
            report.removed_files.push(entry.path);
        }

        // Stale partials and orphaned sidecars
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() || !(is_partial(&path) || is_orphan_sidecar(&path, service)) {
                continue;
            }
            if expired(&path)? {
                remove_if_exists(&path)?;
                report.removed_files.push(path);
            }
        }

        if fs::read_dir(&dir)?.next().is_none() {
            fs::remove_dir(&dir)?;
            report.removed_dirs.push(dir);
        }

        Ok(report)
    }
}

/// Artifact being written. Dropping it without `commit` removes the partial file.
#[derive(Debug)]
pub struct StagedArtifact {
    final_path: PathBuf,
    partial_path: PathBuf,
    metadata_path: PathBuf,
    committed: bool,
}

impl StagedArtifact {
    /// Where producers write bytes
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn file_name(&self) -> String {
        self.final_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Size and SHA-256 of the partial file; an empty file is an integrity error
    pub fn measure(&self) -> Result<(u64, String)> {
        let size = fs::metadata(&self.partial_path)?.len();
        if size == 0 {
            return Err(BackupError::Integrity {
                path: self.final_path.clone(),
                reason: "artifact is empty".to_string(),
            });
        }
        Ok((size, sha256_file(&self.partial_path)?))
    }

    /// Move the artifact into place and write its sidecar
    pub fn commit(mut self, record: &BackupRecord) -> Result<PathBuf> {
        let json = record.to_json()?;
        fs::rename(&self.partial_path, &self.final_path)?;

        let metadata_partial = append_suffix(&self.metadata_path, PARTIAL_SUFFIX);
        let written = fs::write(&metadata_partial, json)
            .and_then(|_| fs::rename(&metadata_partial, &self.metadata_path));

        if let Err(e) = written {
            let _ = remove_if_exists(&metadata_partial);
            let _ = remove_if_exists(&self.final_path);
            return Err(e.into());
        }

        self.committed = true;
        Ok(self.final_path.clone())
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if !self.committed {
            let _ = remove_if_exists(&self.partial_path);
        }
    }
}

/// Sidecar path for a committed artifact
pub fn metadata_path_for(artifact: &Path, service: ServiceType) -> Option<PathBuf> {
    let file_name = artifact.file_name()?.to_str()?;
    let stem = artifact_stem(file_name, service)?;
    Some(artifact.with_file_name(format!("{}{}", stem, METADATA_SUFFIX)))
}

/// Guess the service from an artifact's extension
pub fn service_for(artifact: &Path) -> Option<ServiceType> {
    let file_name = artifact.file_name()?.to_str()?;
    [ServiceType::Database, ServiceType::Vector]
        .into_iter()
        .find(|s| artifact_stem(file_name, *s).is_some())
}

fn artifact_stem(file_name: &str, service: ServiceType) -> Option<&str> {
    file_name
        .strip_suffix(service.extension())
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|stem| !stem.is_empty())
}

/// File-name safe identifier; a lossy rewrite gets a short hash of the raw name
/// so `docs.v1` and `docs-v1` do not share a file name
fn sanitize_identifier(identifier: &str) -> String {
    let safe: String = identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if safe == identifier {
        return safe;
    }

    let digest = Sha256::digest(identifier.as_bytes());
    let tag: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", safe, tag)
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn is_partial(path: &Path) -> bool {
    path.to_string_lossy().ends_with(PARTIAL_SUFFIX)
}

fn is_sidecar(path: &Path) -> bool {
    path.to_string_lossy().ends_with(METADATA_SUFFIX)
}

fn is_orphan_sidecar(path: &Path, service: ServiceType) -> bool {
    let Some(stem) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(METADATA_SUFFIX))
    else {
        return false;
    };
    !path
        .with_file_name(format!("{}.{}", stem, service.extension()))
        .exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::BackupDetails;
    use crate::utils::{created_by, CHECKSUM_ALGORITHM};
    use chrono::TimeZone;
    use std::fs::File;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn record_for(staged: &StagedArtifact, size: u64, checksum: String) -> BackupRecord {
        BackupRecord {
            framework: "dspy".to_string(),
            service_type: ServiceType::Database,
            timestamp: chrono::Utc::now(),
            backup_file: staged.file_name(),
            file_size: size,
            checksum,
            checksum_algorithm: CHECKSUM_ALGORITHM.to_string(),
            created_by: created_by(),
            host: "localhost".to_string(),
            port: 5433,
            details: BackupDetails::Database {
                database: "langfuse".to_string(),
                user: "langfuse_user".to_string(),
                dump_tool_version: "pg_dump (PostgreSQL) 16".to_string(),
            },
        }
    }

    fn commit_artifact(store: &BackupStore, framework: &str, when: DateTime<Local>) -> PathBuf {
        let staged = store.stage(ServiceType::Database, framework, "langfuse", when).unwrap();
        fs::write(staged.partial_path(), b"dump").unwrap();
        let (size, checksum) = staged.measure().unwrap();
        let record = record_for(&staged, size, checksum);
        staged.commit(&record).unwrap()
    }

    // Whole seconds so filesystem timestamp precision cannot shift the boundary
    fn now_secs() -> SystemTime {
        let secs = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs();
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn set_age(path: &Path, now: SystemTime, age: Duration) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(now - age)
            .unwrap();
    }

    #[test]
    fn test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let staged = store.stage(ServiceType::Vector, "dspy", "my_docs-2", at()).unwrap();

        assert_eq!(
            staged.final_path(),
            dir.path().join("vector/dspy/dspy_my_docs-2_20261018_120000.snapshot")
        );
        assert!(staged.partial_path().to_string_lossy().ends_with(".snapshot.partial"));
    }

    #[test]
    fn test_lossy_identifiers_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let dotted = store.stage(ServiceType::Vector, "dspy", "docs.v1", at()).unwrap();
        let dashed = store.stage(ServiceType::Vector, "dspy", "docs-v1", at()).unwrap();
        let spaced = store.stage(ServiceType::Vector, "dspy", "docs v1", at()).unwrap();

        assert_eq!(dashed.file_name(), "dspy_docs-v1_20261018_120000.snapshot");
        assert!(dotted.file_name().starts_with("dspy_docs-v1-"));
        assert_ne!(dotted.final_path(), dashed.final_path());
        assert_ne!(dotted.final_path(), spaced.final_path());
    }

    #[test]
    fn test_stage_refuses_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let first = commit_artifact(&store, "dspy", at());

        let err = store
            .stage(ServiceType::Database, "dspy", "langfuse", at())
            .unwrap_err();
        assert!(matches!(err, BackupError::Integrity { .. }));
        assert_eq!(fs::read(&first).unwrap(), b"dump");
    }

    #[test]
    fn test_cleanup_keeping_spares_fresh_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let now = now_secs();

        let fresh = commit_artifact(&store, "dspy", at());
        let old = commit_artifact(&store, "dspy", at() - chrono::Duration::days(3));
        let old_age = Duration::from_secs(SECONDS_PER_DAY * 3);
        set_age(&old, now, old_age);
        set_age(&metadata_path_for(&old, ServiceType::Database).unwrap(), now, old_age);

        // A zero-day window would otherwise take the artifact just written
        let report = store
            .cleanup_keeping(ServiceType::Database, "dspy", 0, now, &[fresh.clone()])
            .unwrap();

        assert_eq!(report.artifacts_removed(), 1);
        assert!(fresh.exists());
        assert!(metadata_path_for(&fresh, ServiceType::Database).unwrap().exists());
        assert!(!old.exists());
    }

    #[test]
    fn test_cleanup_keeps_old_sidecar_of_live_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let now = now_secs();

        let artifact = commit_artifact(&store, "dspy", at());
        let sidecar = metadata_path_for(&artifact, ServiceType::Database).unwrap();
        set_age(&sidecar, now, Duration::from_secs(SECONDS_PER_DAY * 30));

        let fw_dir = store.framework_dir(ServiceType::Database, "dspy");
        let orphan = fw_dir.join("dspy_langfuse_20260101_000000.metadata.json");
        fs::write(&orphan, b"{}").unwrap();
        set_age(&orphan, now, Duration::from_secs(SECONDS_PER_DAY * 30));

        store.cleanup(ServiceType::Database, "dspy", 7, now).unwrap();

        assert!(artifact.exists());
        assert!(sidecar.exists());
        assert!(!orphan.exists());
    }

    #[test]
    fn test_commit_writes_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let artifact = commit_artifact(&store, "dspy", at());

        let sidecar = metadata_path_for(&artifact, ServiceType::Database).unwrap();
        assert!(artifact.is_file());
        assert_eq!(sidecar.file_name().unwrap(), "dspy_langfuse_20261018_120000.metadata.json");

        let record = BackupRecord::load(&sidecar).unwrap();
        assert_eq!(record.backup_file, "dspy_langfuse_20261018_120000.sql.gz");
        assert!(record.verify_artifact(&artifact).is_ok());
    }

    #[test]
    fn test_dropped_stage_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        {
            let staged = store.stage(ServiceType::Database, "crewai", "langfuse", at()).unwrap();
            fs::write(staged.partial_path(), b"half a dump").unwrap();
        }
        let framework_dir = store.framework_dir(ServiceType::Database, "crewai");
        assert_eq!(fs::read_dir(framework_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_artifact_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let staged = store.stage(ServiceType::Database, "crewai", "langfuse", at()).unwrap();
        File::create(staged.partial_path()).unwrap();
        assert!(matches!(staged.measure(), Err(BackupError::Integrity { .. })));
    }

    #[test]
    fn test_list_sorted_and_ignores_partials() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let later = at() + chrono::Duration::hours(1);
        commit_artifact(&store, "dspy", later);
        commit_artifact(&store, "dspy", at());
        commit_artifact(&store, "crewai", at());

        let fw_dir = store.framework_dir(ServiceType::Database, "dspy");
        fs::write(fw_dir.join("dspy_langfuse_20261019_000000.sql.gz.partial"), b"x").unwrap();

        let entries = store.list(ServiceType::Database, &["dspy"]).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["dspy_langfuse_20261018_120000.sql.gz", "dspy_langfuse_20261018_130000.sql.gz"]
        );
        assert!(entries.iter().all(|e| e.metadata_path.is_some()));

        let all = store.list(ServiceType::Database, &["crewai", "dspy"]).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].framework, "crewai");
    }

    #[test]
    fn test_retention_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let now = now_secs();
        let day = Duration::from_secs(SECONDS_PER_DAY);

        let kept = commit_artifact(&store, "dspy", at());
        let dropped = commit_artifact(&store, "dspy", at() + chrono::Duration::hours(1));
        let kept_meta = metadata_path_for(&kept, ServiceType::Database).unwrap();
        let dropped_meta = metadata_path_for(&dropped, ServiceType::Database).unwrap();

        set_age(&kept, now, day * 7);
        set_age(&kept_meta, now, day * 7);
        set_age(&dropped, now, day * 8);
        set_age(&dropped_meta, now, day * 8);

        let report = store.cleanup(ServiceType::Database, "dspy", 7, now).unwrap();

        assert!(kept.exists() && kept_meta.exists());
        assert!(!dropped.exists() && !dropped_meta.exists());
        assert_eq!(report.artifacts_removed(), 1);
    }

    #[test]
    fn test_cleanup_idempotent_and_removes_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let now = now_secs();
        let old = Duration::from_secs(SECONDS_PER_DAY * 30);

        let artifact = commit_artifact(&store, "pocketflow", at());
        set_age(&artifact, now, old);
        set_age(&metadata_path_for(&artifact, ServiceType::Database).unwrap(), now, old);

        let first = store.cleanup(ServiceType::Database, "pocketflow", 7, now).unwrap();
        assert_eq!(first.removed_files.len(), 2);
        assert_eq!(first.removed_dirs.len(), 1);
        assert!(!store.framework_dir(ServiceType::Database, "pocketflow").exists());

        let second = store.cleanup(ServiceType::Database, "pocketflow", 7, now).unwrap();
        assert!(second.removed_files.is_empty());
        assert!(second.removed_dirs.is_empty());
    }

    #[test]
    fn test_cleanup_sidecar_follows_artifact_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let now = now_secs();

        let artifact = commit_artifact(&store, "dspy", at());
        let sidecar = metadata_path_for(&artifact, ServiceType::Database).unwrap();
        set_age(&artifact, now, Duration::from_secs(SECONDS_PER_DAY * 9));

        store.cleanup(ServiceType::Database, "dspy", 7, now).unwrap();
        assert!(!artifact.exists());
        assert!(!sidecar.exists());
    }

    #[test]
    fn test_service_for() {
        assert_eq!(service_for(Path::new("a/x_y_1.sql.gz")), Some(ServiceType::Database));
        assert_eq!(service_for(Path::new("x_y_1.snapshot")), Some(ServiceType::Vector));
        assert_eq!(service_for(Path::new("x_y_1.tar")), None);
    }
}
