use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::Path;
use std::process::ExitCode;
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;

use fwbackup::cli::{Cli, Commands, ConfigCommands, PostgresCommands, QdrantCommands};
use fwbackup::core::pipeline::{cleanup_frameworks, verify_artifacts};
use fwbackup::core::{
    exit_code_for, require_tools, run_backups, BackupError, BackupStore, DatabasePipeline, DockerManager,
    FrameworkOutcome, FrameworkRegistry, PgDumpGzip, QdrantClient, RunSummary, VectorPipeline,
};
use fwbackup::utils::{
    format_bytes, format_timestamp, render_container_name, AppConfig, ContainerState, ServiceType,
    ALL_FRAMEWORKS,
};

#[tokio::main]
async fn main() -> ExitCode {
    // .env must be loaded before clap reads the environment
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level());

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<u8> {
    let config = AppConfig::load(cli.config_file.as_deref(), cli.overrides())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Postgres { command } => handle_postgres(command, config).await,
        Commands::Qdrant { command } => handle_qdrant(command, config).await,
        Commands::Status => handle_status(&config).await,
        Commands::Verify { framework } => handle_verify(framework.as_deref(), &config),
        Commands::Config { command } => handle_config(command, &config),
    }
}

fn check_port_override(framework: &str, port: Option<u16>) -> Result<()> {
    if port.is_some() && framework == ALL_FRAMEWORKS {
        return Err(BackupError::Config("--port needs a single framework, not 'all'".to_string()).into());
    }
    Ok(())
}

async fn handle_postgres(command: PostgresCommands, config: AppConfig) -> Result<u8> {
    let registry = FrameworkRegistry::new();

    match command {
        PostgresCommands::Backup { framework, port, .. } => {
            let targets = registry.select(Some(framework.as_str()))?;
            check_port_override(&framework, port)?;
            require_tools(PgDumpGzip::backup_requirements())?;
            let docker = DockerManager::connect().await?;

            let pipeline = DatabasePipeline::new(Box::new(docker), Box::new(PgDumpGzip::new()), config)
                .with_port(port);
            let summary = run_backups(&pipeline, &targets).await;
            print_summary(&summary);
            Ok(summary.exit_code())
        }
        PostgresCommands::List { framework } => {
            handle_list(ServiceType::Database, framework.as_deref(), &config)?;
            Ok(0)
        }
        PostgresCommands::Cleanup { framework } => {
            handle_cleanup(ServiceType::Database, &framework, &config)?;
            Ok(0)
        }
        PostgresCommands::Restore { file, port, .. } => {
            require_tools(PgDumpGzip::restore_requirements())?;
            let docker = DockerManager::connect().await?;

            let pipeline = DatabasePipeline::new(Box::new(docker), Box::new(PgDumpGzip::new()), config);
            pipeline.restore(&file, port).await?;
            println!("{} Restored {}", "✓".green(), file.display());
            Ok(0)
        }
    }
}

async fn handle_qdrant(command: QdrantCommands, config: AppConfig) -> Result<u8> {
    let registry = FrameworkRegistry::new();

    match command {
        QdrantCommands::Backup { framework, port, .. } => {
            let targets = registry.select(Some(framework.as_str()))?;
            check_port_override(&framework, port)?;
            let docker = DockerManager::connect().await?;
            let client = QdrantClient::new(config.qdrant.api_key.clone())?;

            let pipeline = VectorPipeline::new(Box::new(docker), Box::new(client), config).with_port(port);
            let summary = run_backups(&pipeline, &targets).await;
            print_summary(&summary);
            Ok(summary.exit_code())
        }
        QdrantCommands::List { framework } => {
            handle_list(ServiceType::Vector, framework.as_deref(), &config)?;
            Ok(0)
        }
        QdrantCommands::Cleanup { framework } => {
            handle_cleanup(ServiceType::Vector, &framework, &config)?;
            Ok(0)
        }
        QdrantCommands::Restore {
            file,
            collection,
            port,
            ..
        } => {
            let docker = DockerManager::connect().await?;
            let client = QdrantClient::new(config.qdrant.api_key.clone())?;

            let pipeline = VectorPipeline::new(Box::new(docker), Box::new(client), config);
            pipeline.restore(&file, collection.as_deref(), port).await?;
            println!("{} Restored {}", "✓".green(), file.display());
            Ok(0)
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    for report in &summary.reports {
        match &report.outcome {
            FrameworkOutcome::Succeeded { artifacts } => {
                println!("  {} {:<14} {} artifact(s)", "✓".green(), report.framework, artifacts.len());
            }
            FrameworkOutcome::Skipped { reason } => {
                println!("  {} {:<14} skipped: {}", "-".yellow(), report.framework, reason);
            }
            FrameworkOutcome::Failed { succeeded, total, errors } => {
                println!("  {} {:<14} failed ({}/{})", "✗".red(), report.framework, succeeded, total);
                for err in errors {
                    println!("      {}", err.dimmed());
                }
            }
        }
    }

    let line = summary.summary_line();
    if summary.failed() > 0 {
        println!("\n{}", line.red().bold());
    } else if summary.skipped() > 0 {
        println!("\n{}", line.yellow().bold());
    } else {
        println!("\n{}", line.green().bold());
    }
}

fn handle_list(service: ServiceType, framework: Option<&str>, config: &AppConfig) -> Result<()> {
    let registry = FrameworkRegistry::new();
    let names: Vec<&str> = registry.select(framework)?.iter().map(|f| f.name).collect();
    let store = BackupStore::new(&config.backup_dir);
    let entries = store.list(service, &names)?;

    if entries.is_empty() {
        println!("No {} backups found in {}", service, store.service_dir(service).display());
        return Ok(());
    }

    println!("{:<14} {:<48} {:>10}  {:<19}  {}", "Framework", "File", "Size", "Modified", "Metadata");
    println!("{}", "-".repeat(104));
    for entry in &entries {
        let metadata = if entry.metadata_path.is_some() {
            "✓".green()
        } else {
            "missing".red()
        };
        println!(
            "{:<14} {:<48} {:>10}  {:<19}  {}",
            entry.framework,
            entry.file_name,
            format_bytes(entry.size),
            format_timestamp(entry.modified),
            metadata
        );
    }
    println!("\n{} backup(s)", entries.len());
    Ok(())
}

fn handle_cleanup(service: ServiceType, framework: &str, config: &AppConfig) -> Result<()> {
    let registry = FrameworkRegistry::new();
    let targets = registry.select(Some(framework))?;
    let store = BackupStore::new(&config.backup_dir);

    let reports = cleanup_frameworks(&store, service, &targets, config.retention_days, SystemTime::now())?;

    let mut removed = 0;
    for (name, report) in &reports {
        let count = report.artifacts_removed();
        removed += count;
        if count > 0 {
            println!("  {} {:<14} removed {} backup(s)", "✓".green(), name, count);
        }
    }
    println!(
        "{} cleanup: {} backup(s) older than {} day(s) removed",
        service, removed, config.retention_days
    );
    Ok(())
}

async fn handle_status(config: &AppConfig) -> Result<u8> {
    let docker = DockerManager::connect().await?;
    let registry = FrameworkRegistry::new();

    println!("{:<14} {:<10} {:<12} {:<10} {:<12} {:<8}", "Framework", "Postgres", "State", "Qdrant", "State", "Langfuse");
    println!("{}", "-".repeat(72));

    for framework in registry.frameworks() {
        let pg_container = render_container_name(&config.postgres.container_pattern, framework.name);
        let qd_container = render_container_name(&config.qdrant.container_pattern, framework.name);
        let pg_state = docker.container_state(&pg_container).await?;
        let qd_state = docker.container_state(&qd_container).await?;

        println!(
            "{:<14} {:<10} {:<12} {:<10} {:<12} {:<8}",
            framework.display_name,
            framework.postgres_port,
            colored_state(pg_state),
            framework.qdrant_port,
            colored_state(qd_state),
            framework.langfuse_port
        );
    }
    Ok(0)
}

fn colored_state(state: ContainerState) -> colored::ColoredString {
    let label = format!("{:<12}", state.as_str());
    match state {
        ContainerState::Running => label.green(),
        ContainerState::Missing | ContainerState::Unknown => label.dimmed(),
        ContainerState::Restarting | ContainerState::Paused => label.yellow(),
        _ => label.red(),
    }
}

fn handle_verify(framework: Option<&str>, config: &AppConfig) -> Result<u8> {
    let registry = FrameworkRegistry::new();
    let targets = registry.select(framework)?;
    let store = BackupStore::new(&config.backup_dir);

    let mut checked = 0;
    let mut problems = Vec::new();
    for service in [ServiceType::Database, ServiceType::Vector] {
        let (count, found) = verify_artifacts(&store, service, &targets)?;
        checked += count;
        problems.extend(found);
    }

    for problem in &problems {
        println!("  {} {}: {}", "✗".red(), display_relative(&problem.path, store.root()), problem.reason);
    }

    if problems.is_empty() {
        println!("{} {} backup(s) verified", "✓".green(), checked);
        Ok(0)
    } else {
        println!("{}", format!("{} of {} backup(s) failed verification", problems.len(), checked).red().bold());
        Ok(1)
    }
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

fn handle_config(command: ConfigCommands, config: &AppConfig) -> Result<u8> {
    match command {
        ConfigCommands::Show => {
            println!("Configuration:\n");
            for (key, value) in config.display_entries() {
                println!("{:<28} {}", key, value);
            }
        }
    }
    Ok(0)
}
