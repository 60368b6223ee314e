pub mod error;
pub mod registry;
pub mod metadata;
pub mod store;
pub mod docker;
pub mod tools;
pub mod qdrant;
pub mod pipeline;
pub mod database;
pub mod vector;

pub use error::{exit_code_for, BackupError, Result};
pub use registry::FrameworkRegistry;
pub use metadata::{BackupDetails, BackupRecord};
pub use store::{ArtifactEntry, BackupStore, CleanupReport};
pub use docker::{ContainerCheck, DockerManager};
pub use tools::{require_tools, DumpTool, PgDumpGzip};
pub use qdrant::{QdrantClient, SnapshotApi};
pub use pipeline::{run_backups, BackupPipeline, FrameworkOutcome, RunSummary};
pub use database::DatabasePipeline;
pub use vector::VectorPipeline;
