/// Benchmark framework definitions and constants
///
/// Port assignments mirror the per-framework docker-compose stacks

use serde::{Deserialize, Serialize};

/// Framework definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framework {
    pub name: &'static str,
    pub display_name: &'static str,
    pub postgres_port: u16,
    pub qdrant_port: u16,
    pub langfuse_port: u16,
}

/// Services that can be backed up for each framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Database,
    Vector,
}

impl ServiceType {
    /// Directory name under the backup root, also used in sidecars
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Database => "database",
            ServiceType::Vector => "vector",
        }
    }

    /// Artifact file extension (without the leading dot)
    pub fn extension(&self) -> &'static str {
        match self {
            ServiceType::Database => "sql.gz",
            ServiceType::Vector => "snapshot",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All benchmarked frameworks, in processing order for `all`
pub const FRAMEWORKS: &[Framework] = &[
    Framework {
        name: "crewai",
        display_name: "CrewAI",
        postgres_port: 5432,
        qdrant_port: 6333,
        langfuse_port: 3000,
    },
    Framework {
        name: "dspy",
        display_name: "DSPy",
        postgres_port: 5433,
        qdrant_port: 6334,
        langfuse_port: 3001,
    },
    Framework {
        name: "pocketflow",
        display_name: "PocketFlow",
        postgres_port: 5434,
        qdrant_port: 6335,
        langfuse_port: 3002,
    },
    Framework {
        name: "google_adk",
        display_name: "Google ADK",
        postgres_port: 5435,
        qdrant_port: 6336,
        langfuse_port: 3003,
    },
    Framework {
        name: "pydantic_ai",
        display_name: "Pydantic AI",
        postgres_port: 5436,
        qdrant_port: 6337,
        langfuse_port: 3004,
    },
];

/// Keyword selecting every registered framework
pub const ALL_FRAMEWORKS: &str = "all";

/// Default paths and connection settings
pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_POSTGRES_USER: &str = "langfuse_user";
pub const DEFAULT_POSTGRES_DB: &str = "langfuse";
pub const DEFAULT_POSTGRES_CONTAINER_PATTERN: &str = "{framework}_postgres";
pub const DEFAULT_QDRANT_CONTAINER_PATTERN: &str = "{framework}_qdrant";

/// Placeholder substituted in container name patterns
pub const FRAMEWORK_PLACEHOLDER: &str = "{framework}";

/// Backup file naming
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const METADATA_SUFFIX: &str = ".metadata.json";
pub const PARTIAL_SUFFIX: &str = ".partial";
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// External tools
pub const PG_DUMP: &str = "pg_dump";
pub const PSQL: &str = "psql";
pub const GZIP: &str = "gzip";

/// Producer tag written into every sidecar
pub fn created_by() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_framework_ports_are_unique() {
        let pg: HashSet<_> = FRAMEWORKS.iter().map(|f| f.postgres_port).collect();
        let qd: HashSet<_> = FRAMEWORKS.iter().map(|f| f.qdrant_port).collect();
        assert_eq!(pg.len(), FRAMEWORKS.len());
        assert_eq!(qd.len(), FRAMEWORKS.len());
    }

    #[test]
    fn test_service_type_layout() {
        assert_eq!(ServiceType::Database.as_str(), "database");
        assert_eq!(ServiceType::Vector.extension(), "snapshot");
        assert_eq!(ServiceType::Database.to_string(), "database");
    }

    #[test]
    fn test_created_by() {
        assert!(created_by().starts_with("fwbackup "));
    }
}
