/// Application configuration management
///
/// Settings are layered: built-in defaults, then ~/.config/fwbackup/config.toml,
/// then environment variables and command-line flags (merged by clap).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{
    mask_sensitive, DEFAULT_BACKUP_DIR, DEFAULT_HOST, DEFAULT_POSTGRES_CONTAINER_PATTERN,
    DEFAULT_POSTGRES_DB, DEFAULT_POSTGRES_USER, DEFAULT_QDRANT_CONTAINER_PATTERN,
    DEFAULT_RETENTION_DAYS,
};

/// On-disk configuration file, every field optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub backup_dir: Option<String>,
    pub retention_days: Option<u32>,
    pub host: Option<String>,
    pub postgres: PostgresFileConfig,
    pub qdrant: QdrantFileConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresFileConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub container_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantFileConfig {
    pub api_key: Option<String>,
    pub container_pattern: Option<String>,
}

impl FileConfig {
    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("fwbackup");
        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from file, or defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backup_dir: Option<PathBuf>,
    pub retention_days: Option<u32>,
    pub host: Option<String>,
    pub postgres_user: Option<String>,
    pub postgres_password: Option<String>,
    pub postgres_database: Option<String>,
    pub postgres_container_pattern: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub qdrant_container_pattern: Option<String>,
}

/// Fully resolved settings shared by both pipelines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub backup_dir: PathBuf,
    pub retention_days: u32,
    pub host: String,
    pub postgres: PostgresSettings,
    pub qdrant: QdrantSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub container_pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QdrantSettings {
    pub api_key: Option<String>,
    pub container_pattern: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::resolve(FileConfig::default(), Overrides::default())
    }
}

impl AppConfig {
    /// Merge the layers, highest precedence first
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Self {
        Self {
            backup_dir: overrides
                .backup_dir
                .or_else(|| file.backup_dir.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            retention_days: overrides
                .retention_days
                .or(file.retention_days)
                .unwrap_or(DEFAULT_RETENTION_DAYS),
            host: overrides
                .host
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            postgres: PostgresSettings {
                user: overrides
                    .postgres_user
                    .or(file.postgres.user)
                    .unwrap_or_else(|| DEFAULT_POSTGRES_USER.to_string()),
                password: overrides.postgres_password.or(file.postgres.password),
                database: overrides
                    .postgres_database
                    .or(file.postgres.database)
                    .unwrap_or_else(|| DEFAULT_POSTGRES_DB.to_string()),
                container_pattern: overrides
                    .postgres_container_pattern
                    .or(file.postgres.container_pattern)
                    .unwrap_or_else(|| DEFAULT_POSTGRES_CONTAINER_PATTERN.to_string()),
            },
            qdrant: QdrantSettings {
                api_key: overrides.qdrant_api_key.or(file.qdrant.api_key),
                container_pattern: overrides
                    .qdrant_container_pattern
                    .or(file.qdrant.container_pattern)
                    .unwrap_or_else(|| DEFAULT_QDRANT_CONTAINER_PATTERN.to_string()),
            },
        }
    }

    /// Load the config file (if any) and apply overrides on top
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => FileConfig::default_path()?,
        };
        let file = FileConfig::load(&path)?;
        let config = Self::resolve(file, overrides);
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a backup run delete its own output
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.retention_days >= 1,
            "retention_days must be at least 1 (got {})",
            self.retention_days
        );
        Ok(())
    }

    /// Key/value view with secrets masked, for `config show`
    pub fn display_entries(&self) -> Vec<(&'static str, String)> {
        let masked = |value: &Option<String>| match value {
            Some(v) => mask_sensitive(v, 2),
            None => "(not set)".to_string(),
        };

        vec![
            ("backup_dir", self.backup_dir.display().to_string()),
            ("retention_days", self.retention_days.to_string()),
            ("host", self.host.clone()),
            ("postgres.user", self.postgres.user.clone()),
            ("postgres.password", masked(&self.postgres.password)),
            ("postgres.database", self.postgres.database.clone()),
            ("postgres.container_pattern", self.postgres.container_pattern.clone()),
            ("qdrant.api_key", masked(&self.qdrant.api_key)),
            ("qdrant.container_pattern", self.qdrant.container_pattern.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.backup_dir, PathBuf::from("./backups"));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.postgres.user, "langfuse_user");
        assert_eq!(config.postgres.database, "langfuse");
        assert_eq!(config.qdrant.container_pattern, "{framework}_qdrant");
    }

    #[test]
    fn test_file_then_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "retention_days = 30").unwrap();
        writeln!(file, "host = \"db.internal\"").unwrap();
        writeln!(file, "[postgres]").unwrap();
        writeln!(file, "user = \"backup\"").unwrap();

        let overrides = Overrides {
            retention_days: Some(3),
            ..Default::default()
        };
        let config = AppConfig::load(Some(file.path()), overrides).unwrap();

        assert_eq!(config.retention_days, 3);
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.postgres.user, "backup");
        assert_eq!(config.postgres.database, "langfuse");
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("nope.toml")), Overrides::default()).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "retention_days = \"many\"").unwrap();
        assert!(AppConfig::load(Some(file.path()), Overrides::default()).is_err());
    }

    #[test]
    fn test_zero_retention_in_file_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "retention_days = 0").unwrap();

        let err = AppConfig::load(Some(file.path()), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("retention_days"));

        let overrides = Overrides {
            retention_days: Some(1),
            ..Default::default()
        };
        assert_eq!(AppConfig::load(Some(file.path()), overrides).unwrap().retention_days, 1);
    }

    #[test]
    fn test_display_masks_secrets() {
        let overrides = Overrides {
            postgres_password: Some("supersecretpassword".to_string()),
            ..Default::default()
        };
        let config = AppConfig::resolve(FileConfig::default(), overrides);
        let entries = config.display_entries();

        let password = entries.iter().find(|(k, _)| *k == "postgres.password").unwrap();
        assert_eq!(password.1, "su...rd");
        let api_key = entries.iter().find(|(k, _)| *k == "qdrant.api_key").unwrap();
        assert_eq!(api_key.1, "(not set)");
    }
}
