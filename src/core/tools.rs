/// External command-line tools: start-up checks and the PostgreSQL dump primitive

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use crate::core::error::{BackupError, Result};
use crate::utils::{GZIP, PG_DUMP, PSQL};

/// Fail before any work if a required tool is not on PATH
pub fn require_tools(tools: &[&str]) -> Result<()> {
    for tool in tools {
        if find_on_path(tool).is_none() {
            return Err(BackupError::MissingTool {
                tool: tool.to_string(),
            });
        }
    }
    Ok(())
}

fn find_on_path(tool: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

/// Connection details for one PostgreSQL instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub password: Option<String>,
}

/// Produces, checks and replays compressed database dumps
pub trait DumpTool: Send + Sync {
    /// Version string recorded in sidecars
    fn version(&self) -> Result<String>;

    /// Dump `target` and write the compressed stream to `dest`
    fn dump_compressed(&self, target: &DumpTarget, dest: &Path) -> Result<()>;

    /// Decompress and discard, failing on a malformed archive
    fn verify_archive(&self, archive: &Path) -> Result<()>;

    /// Decompress `archive` and replay it into `target`
    fn restore(&self, target: &DumpTarget, archive: &Path) -> Result<()>;
}

/// `pg_dump | gzip`, `gzip -t` and `gzip -dc | psql`
#[derive(Debug, Default, Clone)]
pub struct PgDumpGzip;

impl PgDumpGzip {
    pub fn new() -> Self {
        Self
    }

    /// Tools needed for backups
    pub fn backup_requirements() -> &'static [&'static str] {
        &[PG_DUMP, GZIP]
    }

    /// Tools needed for restores
    pub fn restore_requirements() -> &'static [&'static str] {
        &[PSQL, GZIP]
    }

    fn connection_command(program: &str, target: &DumpTarget) -> Command {
        let port = target.port.to_string();
        let mut cmd = Command::new(program);
        cmd.args([
            "-h",
            target.host.as_str(),
            "-p",
            port.as_str(),
            "-U",
            target.user.as_str(),
            "-d",
            target.database.as_str(),
        ]);
        cmd.arg("--no-password");
        if let Some(password) = &target.password {
            cmd.env("PGPASSWORD", password);
        }
        cmd
    }
}

/// Read a child's stderr on its own thread so a chatty producer cannot fill
/// the pipe and stall while we wait on the consumer
fn drain_stderr(child: &mut Child) -> JoinHandle<Vec<u8>> {
    let stderr = child.stderr.take();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf);
        }
        buf
    })
}

/// Kill and reap a producer whose consumer could not be waited on
fn abandon(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_failed(tool: &str, e: std::io::Error) -> BackupError {
    BackupError::DumpFailed {
        tool: tool.to_string(),
        detail: format!("failed to start: {}", e),
    }
}

fn exit_detail(status: std::process::ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", status)
    } else {
        format!("exited with {}: {}", status, stderr)
    }
}

impl DumpTool for PgDumpGzip {
    fn version(&self) -> Result<String> {
        let output = Command::new(PG_DUMP)
            .arg("--version")
            .output()
            .map_err(|e| spawn_failed(PG_DUMP, e))?;

        if !output.status.success() {
            return Err(BackupError::DumpFailed {
                tool: PG_DUMP.to_string(),
                detail: exit_detail(output.status, &output.stderr),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn dump_compressed(&self, target: &DumpTarget, dest: &Path) -> Result<()> {
        let out = File::create(dest)?;

        let mut dump = Self::connection_command(PG_DUMP, target)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failed(PG_DUMP, e))?;

        let dump_stdout = dump.stdout.take().ok_or_else(|| BackupError::DumpFailed {
            tool: PG_DUMP.to_string(),
            detail: "stdout was not captured".to_string(),
        })?;

        let gzip = Command::new(GZIP)
            .arg("-c")
            .stdin(Stdio::from(dump_stdout))
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failed(GZIP, e));

        let gzip = match gzip {
            Ok(child) => child,
            Err(e) => {
                abandon(dump);
                return Err(e);
            }
        };
        let dump_stderr = drain_stderr(&mut dump);

        // gzip finishes once pg_dump closes its stdout
        let gzip_output = match gzip.wait_with_output() {
            Ok(output) => output,
            Err(e) => {
                abandon(dump);
                return Err(e.into());
            }
        };
        let dump_status = dump.wait()?;
        let dump_stderr = dump_stderr.join().unwrap_or_default();

        if !dump_status.success() {
            return Err(BackupError::DumpFailed {
                tool: PG_DUMP.to_string(),
                detail: exit_detail(dump_status, &dump_stderr),
            });
        }
        if !gzip_output.status.success() {
            return Err(BackupError::DumpFailed {
                tool: GZIP.to_string(),
                detail: exit_detail(gzip_output.status, &gzip_output.stderr),
            });
        }
        Ok(())
    }

    fn verify_archive(&self, archive: &Path) -> Result<()> {
        let output = Command::new(GZIP)
            .arg("-t")
            .arg(archive)
            .output()
            .map_err(|e| spawn_failed(GZIP, e))?;

        if !output.status.success() {
            return Err(BackupError::Integrity {
                path: archive.to_path_buf(),
                reason: exit_detail(output.status, &output.stderr),
            });
        }
        Ok(())
    }

    fn restore(&self, target: &DumpTarget, archive: &Path) -> Result<()> {
        let mut gunzip = Command::new(GZIP)
            .arg("-dc")
            .arg(archive)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failed(GZIP, e))?;

        let sql = gunzip.stdout.take().ok_or_else(|| BackupError::DumpFailed {
            tool: GZIP.to_string(),
            detail: "stdout was not captured".to_string(),
        })?;

        let psql = Self::connection_command(PSQL, target)
            .args(["--quiet", "--set", "ON_ERROR_STOP=1"])
            .stdin(Stdio::from(sql))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failed(PSQL, e));

        let psql = match psql {
            Ok(child) => child,
            Err(e) => {
                abandon(gunzip);
                return Err(e);
            }
        };
        let gunzip_stderr = drain_stderr(&mut gunzip);

        let psql_output = match psql.wait_with_output() {
            Ok(output) => output,
            Err(e) => {
                abandon(gunzip);
                return Err(e.into());
            }
        };
        let gunzip_status = gunzip.wait()?;
        let gunzip_stderr = gunzip_stderr.join().unwrap_or_default();

        if !gunzip_status.success() {
            return Err(BackupError::Integrity {
                path: archive.to_path_buf(),
                reason: exit_detail(gunzip_status, &gunzip_stderr),
            });
        }
        if !psql_output.status.success() {
            return Err(BackupError::DumpFailed {
                tool: PSQL.to_string(),
                detail: exit_detail(psql_output.status, &psql_output.stderr),
            });
        }
        Ok(())
    }
}
