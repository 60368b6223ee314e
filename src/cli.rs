/// CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::app_config::Overrides;
use crate::utils::ALL_FRAMEWORKS;

// Build timestamp injected at compile time
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser, Debug)]
#[command(name = "fwbackup")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Root directory for backups
    #[arg(long, global = true, env = "BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Days to keep backups
    #[arg(long = "retention", global = true, env = "RETENTION_DAYS", value_parser = clap::value_parser!(u32).range(1..))]
    pub retention_days: Option<u32>,

    /// Host the services are published on
    #[arg(long, global = true, env = "BACKUP_HOST")]
    pub host: Option<String>,

    /// Config file (default: ~/.config/fwbackup/config.toml)
    #[arg(long = "config", global = true)]
    pub config_file: Option<PathBuf>,

    /// Postgres container name pattern, `{framework}` is substituted
    #[arg(long, global = true, env = "POSTGRES_CONTAINER_PATTERN", hide = true)]
    pub postgres_container_pattern: Option<String>,

    /// Qdrant container name pattern, `{framework}` is substituted
    #[arg(long, global = true, env = "QDRANT_CONTAINER_PATTERN", hide = true)]
    pub qdrant_container_pattern: Option<String>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// PostgreSQL dumps
    Postgres {
        #[command(subcommand)]
        command: PostgresCommands,
    },

    /// Qdrant snapshots
    Qdrant {
        #[command(subcommand)]
        command: QdrantCommands,
    },

    /// Show container state and ports for every framework
    Status,

    /// Re-check committed backups against their metadata
    Verify {
        /// Framework name (default: all)
        framework: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct PostgresConnection {
    /// Database user
    #[arg(long, env = "POSTGRES_USER")]
    pub user: Option<String>,

    /// Database password
    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Database name
    #[arg(long, env = "POSTGRES_DB")]
    pub database: Option<String>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct QdrantConnection {
    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum PostgresCommands {
    /// Dump one framework's database, or all of them
    Backup {
        #[arg(default_value = ALL_FRAMEWORKS)]
        framework: String,

        #[command(flatten)]
        connection: PostgresConnection,

        /// Port override (single framework only)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List dumps
    List { framework: Option<String> },

    /// Delete dumps older than the retention window
    Cleanup {
        #[arg(default_value = ALL_FRAMEWORKS)]
        framework: String,
    },

    /// Replay a dump with psql
    Restore {
        file: PathBuf,

        #[command(flatten)]
        connection: PostgresConnection,

        /// Port override
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Debug)]
pub enum QdrantCommands {
    /// Snapshot every collection of one framework, or all of them
    Backup {
        #[arg(default_value = ALL_FRAMEWORKS)]
        framework: String,

        #[command(flatten)]
        connection: QdrantConnection,

        /// Port override (single framework only)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List snapshots
    List { framework: Option<String> },

    /// Delete snapshots older than the retention window
    Cleanup {
        #[arg(default_value = ALL_FRAMEWORKS)]
        framework: String,
    },

    /// Upload a snapshot back into its collection
    Restore {
        file: PathBuf,

        /// Recover into this collection instead of the recorded one
        #[arg(short, long)]
        collection: Option<String>,

        #[command(flatten)]
        connection: QdrantConnection,

        /// Port override
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

impl Cli {
    /// Values from flags and environment, to be layered over the config file
    pub fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            backup_dir: self.backup_dir.clone(),
            retention_days: self.retention_days,
            host: self.host.clone(),
            postgres_container_pattern: self.postgres_container_pattern.clone(),
            qdrant_container_pattern: self.qdrant_container_pattern.clone(),
            ..Overrides::default()
        };

        match &self.command {
            Commands::Postgres {
                command: PostgresCommands::Backup { connection, .. } | PostgresCommands::Restore { connection, .. },
            } => {
                overrides.postgres_user = connection.user.clone();
                overrides.postgres_password = connection.password.clone();
                overrides.postgres_database = connection.database.clone();
            }
            Commands::Qdrant {
                command: QdrantCommands::Backup { connection, .. } | QdrantCommands::Restore { connection, .. },
            } => {
                overrides.qdrant_api_key = connection.api_key.clone();
            }
            _ => {}
        }

        overrides
    }

    /// Default log filter for the `-v` count
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
